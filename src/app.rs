//! The command API: natural-language text in, result or readable error
//! out.
//!
//! `execute_command` checks session health, captures the page summary,
//! asks the LLM for a plan (through the response cache), validates it
//! and hands it to the executor. Per-command failures come back as
//! errors the REPL renders and moves on from; only a failed session
//! rebuild is fatal.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Settings;
use crate::cookies::CookieStore;
use crate::errors::{PilotError, PilotResult};
use crate::executor::{CommandOutcome, Executor, ProgressEvent};
use crate::health::{HealthMonitor, HealthState};
use crate::llm::{LlmClient, ResponseCache};
use crate::plan::parse_plan;
use crate::plugins::{self, Plugin};
use crate::session::{capture_page_summary, BrowserSession, SharedSession};

pub struct App {
    settings: Arc<Settings>,
    session: SharedSession,
    cookies: Arc<CookieStore>,
    llm: Arc<LlmClient>,
    plugins: Arc<Vec<Box<dyn Plugin>>>,
    health: HealthState,
    progress_tx: mpsc::UnboundedSender<ProgressEvent>,
    shutdown: CancellationToken,
}

impl App {
    /// Launch the browser session, plugins and health monitor. Returns
    /// the app plus the progress-event stream and the fatal-error
    /// channel for the caller to watch.
    pub async fn start(
        settings: Settings,
    ) -> PilotResult<(
        Self,
        mpsc::UnboundedReceiver<ProgressEvent>,
        watch::Receiver<Option<String>>,
    )> {
        let settings = Arc::new(settings);

        let plugins: Arc<Vec<Box<dyn Plugin>>> = Arc::new(
            plugins::build_plugins(&settings.plugins)
                .map_err(|err| PilotError::Config(err.to_string()))?,
        );

        let cache = settings.cache.enabled.then(|| {
            let cache = ResponseCache::new(&settings.cache.dir, settings.cache.ttl_seconds);
            cache.purge_expired();
            cache
        });
        let llm = Arc::new(LlmClient::new(&settings.llm, cache)?);

        let cookies = Arc::new(CookieStore::new(
            &settings.cookies.dir,
            settings.cookies.max_age_days,
        ));
        cookies.clear_expired();

        let session = BrowserSession::launch(&settings).await?;
        plugins::initialize_all(&plugins, &session.driver, session.page).await;
        let session: SharedSession = Arc::new(RwLock::new(Some(session)));

        let shutdown = CancellationToken::new();
        let (health, fatal_rx, _monitor) =
            HealthMonitor::spawn(session.clone(), settings.clone(), shutdown.clone());

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        info!(target: "app", "webpilot ready");
        Ok((
            Self {
                settings,
                session,
                cookies,
                llm,
                plugins,
                health,
                progress_tx,
                shutdown,
            },
            progress_rx,
            fatal_rx,
        ))
    }

    /// Execute one natural-language command against the live session.
    pub async fn execute_command(&self, command: &str) -> PilotResult<CommandOutcome> {
        if !self.health.snapshot().is_healthy {
            return Err(PilotError::SessionUnhealthy(
                "session is being rebuilt, try again shortly".into(),
            ));
        }

        info!(target: "app", command, "processing command");

        // Hold the lock only long enough to clone the handles; a
        // health-triggered teardown mid-plan fails the in-flight step
        // with a session-closed error instead of deadlocking.
        let mut executor = {
            let guard = self.session.read().await;
            let session = guard.as_ref().ok_or_else(|| {
                PilotError::SessionUnhealthy("no active browser session".into())
            })?;
            Executor::new(
                session,
                self.cookies.clone(),
                Some(self.llm.clone()),
                self.plugins.clone(),
                self.settings.clone(),
                self.progress_tx.clone(),
            )
        };

        let summary = {
            let guard = self.session.read().await;
            match guard.as_ref() {
                Some(session) => capture_page_summary(&session.driver, session.page).await,
                None => String::new(),
            }
        };

        let reply = self.llm.plan(command, &summary).await?;
        let plan = parse_plan(&reply)?;
        info!(
            target: "app",
            url = %plan.url,
            actions = plan.actions.len(),
            "plan validated"
        );

        executor.run(&plan).await
    }

    /// Tear everything down: monitor first, then the session handles.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut guard = self.session.write().await;
        if let Some(session) = guard.take() {
            session.teardown().await;
        }
        info!(target: "app", "shut down");
    }
}
