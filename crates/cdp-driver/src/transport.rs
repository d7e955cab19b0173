//! Raw CDP command transport.
//!
//! Owns the websocket connection to a launched (or attached) Chromium,
//! multiplexes commands by call id, and pumps protocol events to the
//! driver. The browser child process lives and dies with the transport
//! runtime.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::util::extract_ws_url;
use crate::{DriverConfig, DriverError};

/// A protocol event forwarded from the browser.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Where a command is addressed: the browser endpoint or a page session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Minimal transport capability surface the driver depends on.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), DriverError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, DriverError>;
}

/// Transport backed by a real Chromium process (or an external websocket).
pub struct ChromiumTransport {
    cfg: DriverConfig,
    state: Arc<OnceCell<Mutex<Option<Arc<RuntimeState>>>>>,
}

impl ChromiumTransport {
    pub fn new(cfg: DriverConfig) -> Self {
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
        }
    }

    /// Returns the live runtime, relaunching the browser if the previous
    /// connection died.
    async fn runtime(&self) -> Result<Arc<RuntimeState>, DriverError> {
        let cell = self.state.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = cell.lock().await;

        if let Some(rt) = guard.as_ref() {
            if rt.is_alive() {
                return Ok(rt.clone());
            }
        }

        let runtime = Arc::new(RuntimeState::start(self.cfg.clone()).await?);
        *guard = Some(runtime.clone());
        Ok(runtime)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), DriverError> {
        let runtime = self.runtime().await?;
        let deadline = Duration::from_millis(self.cfg.command_deadline_ms);

        runtime
            .send_internal(
                CommandTarget::Browser,
                "Target.setDiscoverTargets",
                json!({ "discover": true }),
                deadline,
            )
            .await?;

        runtime
            .send_internal(
                CommandTarget::Browser,
                "Target.setAutoAttach",
                json!({
                    "autoAttach": true,
                    "waitForDebuggerOnStart": false,
                    "flatten": true,
                }),
                deadline,
            )
            .await?;

        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.runtime().await {
            Ok(runtime) => runtime.next_event().await,
            Err(err) => {
                warn!(target: "cdp-driver", ?err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, DriverError> {
        let runtime = self.runtime().await?;
        runtime
            .send_internal(
                target,
                method,
                params,
                Duration::from_millis(self.cfg.command_deadline_ms),
            )
            .await
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, DriverError>>,
}

struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl RuntimeState {
    async fn start(cfg: DriverConfig) -> Result<Self, DriverError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url)
        } else {
            let browser_cfg = Self::browser_config(&cfg)?;
            Self::launch_browser(browser_cfg).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| DriverError::CdpIo(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();

        let loop_task = tokio::spawn(async move {
            let result = Self::run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-driver", ?err, "transport loop terminated with error");
            }
        });

        let heartbeat_task = Self::spawn_heartbeat(
            command_tx.clone(),
            alive.clone(),
            Duration::from_millis(cfg.heartbeat_interval_ms),
        );

        info!(target: "cdp-driver", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            heartbeat_task,
            child: Mutex::new(child),
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, DriverError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| DriverError::CdpIo(err.to_string()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DriverError::CdpIo(
                "command response channel closed".into(),
            )),
            Err(_) => Err(DriverError::Timeout(format!("command {method} timed out"))),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    fn spawn_heartbeat(
        sender: mpsc::Sender<ControlMessage>,
        alive: Arc<AtomicBool>,
        interval_duration: Duration,
    ) -> Option<JoinHandle<()>> {
        if interval_duration.as_millis() == 0 {
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = interval(interval_duration);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while alive.load(Ordering::Relaxed) {
                ticker.tick().await;
                if !alive.load(Ordering::Relaxed) {
                    break;
                }

                let (resp_tx, resp_rx) = oneshot::channel();
                let message = ControlMessage {
                    target: CommandTarget::Browser,
                    method: "Browser.getVersion".to_string(),
                    params: Value::Object(Default::default()),
                    responder: resp_tx,
                };

                if sender.send(message).await.is_err() {
                    debug!(target: "cdp-driver", "heartbeat send failed (channel closed)");
                    break;
                }

                match tokio::time::timeout(Duration::from_secs(5), resp_rx).await {
                    Ok(Ok(Ok(_))) => {}
                    Ok(Ok(Err(err))) => {
                        warn!(target: "cdp-driver", ?err, "heartbeat command error");
                        break;
                    }
                    Ok(Err(_)) => {
                        debug!(target: "cdp-driver", "heartbeat response channel closed");
                        break;
                    }
                    Err(_) => {
                        warn!(target: "cdp-driver", "heartbeat timed out");
                        break;
                    }
                }
            }
        }))
    }

    fn browser_config(cfg: &DriverConfig) -> Result<BrowserConfig, DriverError> {
        if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
            return Err(DriverError::Launch(format!(
                "chrome executable not found at {} (set WEBPILOT_CHROME)",
                cfg.executable.display()
            )));
        }

        let profile_dir = if cfg.user_data_dir.is_absolute() {
            cfg.user_data_dir.clone()
        } else {
            std::env::current_dir()
                .map_err(|err| DriverError::Launch(format!("failed to resolve cwd: {err}")))?
                .join(&cfg.user_data_dir)
        };
        fs::create_dir_all(&profile_dir)
            .map_err(|err| DriverError::Launch(format!("failed to ensure user-data-dir: {err}")))?;

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(cfg.command_deadline_ms))
            .launch_timeout(Duration::from_secs(20));

        if !cfg.headless {
            builder = builder.with_head();
        }
        if cfg.no_sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-breakpad",
            "--disable-client-side-phishing-detection",
            "--disable-component-update",
            "--disable-default-apps",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--disable-hang-monitor",
            "--disable-popup-blocking",
            "--disable-prompt-on-repost",
            "--disable-sync",
            "--metrics-recording-only",
            "--no-first-run",
            "--no-default-browser-check",
            "--password-store=basic",
            "--remote-allow-origins=*",
            "--use-mock-keychain",
        ];
        if cfg.headless {
            args.push("--headless=new");
            args.push("--hide-scrollbars");
            args.push("--mute-audio");
        }
        builder = builder.args(args);

        if !cfg.executable.as_os_str().is_empty() {
            builder = builder.chrome_executable(cfg.executable.clone());
        }
        builder = builder.user_data_dir(profile_dir);

        builder
            .build()
            .map_err(|err| DriverError::Launch(format!("browser config error: {err}")))
    }

    async fn launch_browser(
        config: BrowserConfig,
    ) -> Result<(Option<Child>, String), DriverError> {
        let mut child = config
            .launch()
            .map_err(|err| DriverError::Launch(format!("failed to launch chromium: {err}")))?;

        let ws_url = extract_ws_url(&mut child)
            .await
            .map_err(|err| DriverError::CdpIo(err.to_string()))?;

        Ok((Some(child), ws_url))
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        mut event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<(), DriverError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, DriverError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::handle_command(&mut conn, cmd, &mut inflight)?;
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::handle_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            if let Err(err) = Self::handle_event(event, &mut event_tx).await {
                                warn!(target: "cdp-driver", ?err, "failed to forward event");
                            }
                        }
                        Some(Err(err)) => {
                            let driver_err = Self::map_cdp_error(err);
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(driver_err.clone()));
                            }
                            return Err(driver_err);
                        }
                        None => {
                            let err = DriverError::CdpIo("cdp connection closed".into());
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_command(
        conn: &mut Connection<CdpEventMessage>,
        cmd: ControlMessage,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, DriverError>>>,
    ) -> Result<(), DriverError> {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
                Ok(())
            }
            Err(err) => {
                let driver_err = DriverError::CdpIo(err.to_string());
                let _ = cmd.responder.send(Err(driver_err.clone()));
                Err(driver_err)
            }
        }
    }

    fn handle_response(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, DriverError>>>,
    ) {
        let entry = inflight.remove(&resp.id);
        let result = Self::extract_payload(resp);

        if let Some(sender) = entry {
            let _ = sender.send(result);
        }
    }

    async fn handle_event(
        event: CdpEventMessage,
        event_tx: &mut mpsc::Sender<TransportEvent>,
    ) -> Result<(), DriverError> {
        let raw: CdpJsonEventMessage = event
            .try_into()
            .map_err(|err| DriverError::Protocol(format!("failed to decode cdp event: {err}")))?;

        let payload = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };

        event_tx
            .send(payload)
            .await
            .map_err(|err| DriverError::CdpIo(err.to_string()))
    }

    fn extract_payload(resp: Response) -> Result<Value, DriverError> {
        if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(error) = resp.error {
            Err(DriverError::CdpIo(format!(
                "cdp error {}: {}",
                error.code, error.message
            )))
        } else {
            Err(DriverError::Protocol("empty cdp response".into()))
        }
    }

    fn map_cdp_error(err: CdpError) -> DriverError {
        let hint = err.to_string();
        match err {
            CdpError::Timeout => DriverError::Timeout(hint),
            _ => DriverError::CdpIo(hint),
        }
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Some(handle) = &self.heartbeat_task {
            handle.abort();
        }

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-driver", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-driver", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}
