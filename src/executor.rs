//! Execution state machine.
//!
//! Walks a validated plan strictly in order: `Idle -> Navigating ->
//! ExecutingStep(i) -> { ExecutingStep(i+1) | Extracting | Done |
//! Failed }`. A missing click/type target fails the whole plan with a
//! message naming the target; a wait that never materializes does not.
//! Progress is published on an event channel, decoupling status
//! presentation from execution.

use std::sync::Arc;
use std::time::Duration;

use cdp_driver::{Driver, PageId};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::cookies::CookieStore;
use crate::errors::{PilotError, PilotResult};
use crate::llm::LlmClient;
use crate::overlay::OverlayHandler;
use crate::plan::{Action, ActionKind, ActionPlan};
use crate::plugins::Plugin;
use crate::session::BrowserSession;

/// Executor states. Terminal states are `Done` and `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    Navigating,
    ExecutingStep(usize),
    Extracting,
    Done,
    Failed,
}

/// Progress notifications published while a plan runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    PlanReceived { actions: usize },
    Navigating { url: String },
    StepStarted { index: usize, kind: ActionKind },
    StepFinished { index: usize },
    Extracting,
    Completed,
    Failed { reason: String },
}

/// Result of a successfully executed plan.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Message(String),
    Structured(Value),
}

impl std::fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandOutcome::Message(text) => write!(f, "{text}"),
            CommandOutcome::Structured(value) => {
                write!(f, "{}", serde_json::to_string_pretty(value).unwrap_or_default())
            }
        }
    }
}

pub struct Executor {
    driver: Arc<dyn Driver>,
    page: PageId,
    resolver: Arc<element_resolver::ElementResolver>,
    cookies: Arc<CookieStore>,
    llm: Option<Arc<LlmClient>>,
    plugins: Arc<Vec<Box<dyn Plugin>>>,
    settings: Arc<Settings>,
    progress: mpsc::UnboundedSender<ProgressEvent>,
    state: ExecState,
    /// URLs already navigated to within this plan.
    navigated: Vec<String>,
}

impl Executor {
    pub fn new(
        session: &BrowserSession,
        cookies: Arc<CookieStore>,
        llm: Option<Arc<LlmClient>>,
        plugins: Arc<Vec<Box<dyn Plugin>>>,
        settings: Arc<Settings>,
        progress: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            driver: session.driver.clone(),
            page: session.page,
            resolver: session.resolver.clone(),
            cookies,
            llm,
            plugins,
            settings,
            progress,
            state: ExecState::Idle,
            navigated: Vec::new(),
        }
    }

    pub fn state(&self) -> &ExecState {
        &self.state
    }

    fn emit(&self, event: ProgressEvent) {
        let _ = self.progress.send(event);
    }

    fn fail(&mut self, error: PilotError) -> PilotError {
        self.state = ExecState::Failed;
        self.emit(ProgressEvent::Failed {
            reason: error.to_string(),
        });
        error
    }

    /// Execute the plan to a terminal state. Steps run strictly in plan
    /// order; no step begins before the previous one completes.
    pub async fn run(&mut self, plan: &ActionPlan) -> PilotResult<CommandOutcome> {
        self.emit(ProgressEvent::PlanReceived {
            actions: plan.actions.len(),
        });

        self.state = ExecState::Navigating;
        if let Err(err) = self.navigate_to(&plan.url).await {
            return Err(self.fail(err));
        }

        let mut extracted: Option<Value> = None;

        for (index, action) in plan.actions.iter().enumerate() {
            self.state = ExecState::ExecutingStep(index);
            self.emit(ProgressEvent::StepStarted {
                index,
                kind: action.kind,
            });

            let step_result = match action.kind {
                ActionKind::Navigate => self.step_navigate(action).await,
                ActionKind::Click => self.step_click(action).await,
                ActionKind::Type => self.step_type(action).await,
                ActionKind::Wait => self.step_wait(action).await,
                ActionKind::Extract => match self.step_extract(plan).await {
                    Ok(value) => {
                        extracted = value.or(extracted);
                        Ok(())
                    }
                    Err(err) => Err(err),
                },
            };

            if let Err(err) = step_result {
                return Err(self.fail(err));
            }
            self.emit(ProgressEvent::StepFinished { index });
        }

        // A plan may carry extraction directives without an explicit
        // extract step; they still decide the return value.
        if extracted.is_none() && plan.has_extraction() {
            match self.step_extract(plan).await {
                Ok(value) => extracted = value,
                Err(err) => return Err(self.fail(err)),
            }
        }

        self.state = ExecState::Done;
        self.emit(ProgressEvent::Completed);
        Ok(match extracted {
            Some(value) => CommandOutcome::Structured(value),
            None => CommandOutcome::Message("Command executed successfully".into()),
        })
    }

    /// The full navigation pipeline: plugin hooks, domain overrides,
    /// stored cookies, load, instrumentation re-arm, overlay pass,
    /// cookie persistence.
    async fn navigate_to(&mut self, url: &str) -> PilotResult<()> {
        self.emit(ProgressEvent::Navigating {
            url: url.to_string(),
        });

        for plugin in self.plugins.iter() {
            if let Err(err) = plugin.before_navigation(&self.driver, self.page, url).await {
                warn!(target: "executor", plugin = plugin.name(), ?err, "before_navigation failed");
            }
        }

        let session_view = BrowserSession {
            driver: self.driver.clone(),
            page: self.page,
            resolver: self.resolver.clone(),
        };
        session_view
            .apply_domain_overrides(&self.settings, url)
            .await;

        match self.cookies.load_for(url) {
            Ok(cookies) if !cookies.is_empty() => {
                if let Err(err) = self.driver.set_cookies(self.page, &cookies).await {
                    warn!(target: "executor", ?err, "failed to restore cookies");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(target: "executor", ?err, "cookie load failed"),
        }

        let timeout = Duration::from_millis(self.settings.browser.navigation_timeout_ms);
        self.driver
            .navigate(self.page, url, timeout)
            .await
            .map_err(|err| PilotError::Navigation(format!("{url}: {err}")))?;

        self.navigated.push(url.to_string());
        self.resolver.on_navigated(url);
        session_view.rearm_instrumentation().await;

        OverlayHandler::dismiss_overlays(&self.driver, self.page, url).await;

        match self.driver.get_cookies(self.page, &[url.to_string()]).await {
            Ok(cookies) => {
                if let Err(err) = self.cookies.save_for(url, cookies) {
                    warn!(target: "executor", ?err, "cookie save failed");
                }
            }
            Err(err) => warn!(target: "executor", ?err, "cookie capture failed"),
        }

        for plugin in self.plugins.iter() {
            if let Err(err) = plugin.after_navigation(&self.driver, self.page, url).await {
                warn!(target: "executor", plugin = plugin.name(), ?err, "after_navigation failed");
            }
        }

        info!(target: "executor", url, "navigation complete");
        Ok(())
    }

    /// Navigations already performed in this plan are skipped, avoiding
    /// a double page load when the plan lists both a top-level url and a
    /// redundant navigate action.
    async fn step_navigate(&mut self, action: &Action) -> PilotResult<()> {
        if self.navigated.iter().any(|seen| seen == &action.value) {
            info!(target: "executor", url = %action.value, "skipping redundant navigation");
            return Ok(());
        }
        self.navigate_to(&action.value).await
    }

    async fn step_click(&mut self, action: &Action) -> PilotResult<()> {
        let resolution = self
            .resolver
            .resolve(self.page, &action.target, self.element_timeout())
            .await
            .map_err(|_| {
                PilotError::ElementNotFound(format!("no clickable element for '{}'", action.target))
            })?;

        self.driver
            .click(self.page, &resolution.selector, self.element_timeout())
            .await?;
        self.settle().await;
        Ok(())
    }

    async fn step_type(&mut self, action: &Action) -> PilotResult<()> {
        let resolution = self
            .resolver
            .resolve(self.page, &action.target, self.element_timeout())
            .await
            .map_err(|_| {
                PilotError::ElementNotFound(format!("no input element for '{}'", action.target))
            })?;

        let keystroke_delay = Duration::from_millis(self.settings.resolver.keystroke_delay_ms);
        self.driver
            .type_text(
                self.page,
                &resolution.selector,
                &action.value,
                keystroke_delay,
                self.element_timeout(),
            )
            .await?;

        if action.press_enter {
            self.driver.press_key(self.page, "Enter").await?;
        }
        self.settle().await;
        Ok(())
    }

    /// Best-effort staging hint: block until the wait target shows up or
    /// the timeout passes; never fails the plan.
    async fn step_wait(&mut self, action: &Action) -> PilotResult<()> {
        let target = if action.wait_for.is_empty() {
            &action.target
        } else {
            &action.wait_for
        };
        if target.is_empty() {
            return Ok(());
        }

        match self
            .resolver
            .resolve(self.page, target, self.element_timeout())
            .await
        {
            Ok(_) => debug!(target: "executor", wait_for = %target, "wait target appeared"),
            Err(err) => {
                debug!(target: "executor", wait_for = %target, %err, "wait target never appeared, proceeding");
            }
        }
        Ok(())
    }

    /// Capture page content and delegate structured extraction to the
    /// LLM. The result becomes the plan's return value.
    async fn step_extract(&mut self, plan: &ActionPlan) -> PilotResult<Option<Value>> {
        if !plan.has_extraction() {
            return Ok(None);
        }
        let Some(llm) = self.llm.clone() else {
            return Err(PilotError::Llm(
                "extraction requested but no LLM client is configured".into(),
            ));
        };

        self.state = ExecState::Extracting;
        self.emit(ProgressEvent::Extracting);

        let content = self.driver.page_content(self.page).await?;
        let value = llm.extract(&content, &plan.extraction).await?;
        Ok(Some(value))
    }

    fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.resolver.element_timeout_ms)
    }

    /// Short pause after interactions for the page to settle.
    async fn settle(&self) {
        let delay = Duration::from_millis(self.settings.resolver.settle_delay_ms);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}
