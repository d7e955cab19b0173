//! Chromium DevTools Protocol driver.
//!
//! Exposes the primitive browser operations the automation core consumes:
//! navigate, evaluate, wait for selector, click, type, keys, cookies,
//! headers, emulation overrides, URL blocking and init scripts. Commands
//! travel over a raw CDP transport ([`transport::CdpTransport`]) so tests
//! can substitute a mock for the live browser.

pub mod transport;
mod util;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
pub use util::detect_chrome_executable;

/// Opaque page handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Driver error taxonomy.
#[derive(Debug, Error, Clone)]
pub enum DriverError {
    /// Browser could not be launched or configured.
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Transport-level failure talking to the browser.
    #[error("cdp i/o error: {0}")]
    CdpIo(String),

    /// A command or wait exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The addressed selector/target does not exist on the page.
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// The page or browser session has been closed underneath the caller.
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// Malformed protocol traffic.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::CdpIo(_) | DriverError::Timeout(_))
    }
}

/// Configuration for launching and tuning the driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverConfig {
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub no_sandbox: bool,
    pub command_deadline_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Attach to an already-running browser instead of launching one.
    pub websocket_url: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            executable: util::detect_chrome_executable().unwrap_or_default(),
            user_data_dir: PathBuf::from("./.webpilot-profile"),
            headless: true,
            no_sandbox: false,
            command_deadline_ms: 30_000,
            heartbeat_interval_ms: 15_000,
            websocket_url: None,
        }
    }
}

/// Page lifecycle notifications broadcast to subscribers.
#[derive(Clone, Debug)]
pub enum PageEvent {
    Opened { page: PageId },
    Lifecycle { page: PageId, phase: String },
    Closed { page: PageId },
    TransportError { message: String },
}

/// Parameters accepted by `Network.setCookies`, round-trippable with
/// `Network.getCookies` output.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookieParam {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// Trait capturing the primitive browser capability surface required by
/// the automation core. Implemented by [`ChromiumDriver`] for real
/// browsers and by mocks in tests.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a new page and wait until its CDP session is attached.
    async fn create_page(&self, url: &str) -> Result<PageId, DriverError>;

    /// Navigate and block until the DOM is interactive or the deadline
    /// elapses.
    async fn navigate(&self, page: PageId, url: &str, deadline: Duration)
        -> Result<(), DriverError>;

    /// Evaluate an expression, returning its value by JSON.
    async fn evaluate(&self, page: PageId, expression: &str) -> Result<Value, DriverError>;

    /// Evaluate an expression that yields a Promise, awaiting it.
    async fn evaluate_async(
        &self,
        page: PageId,
        expression: &str,
        deadline: Duration,
    ) -> Result<Value, DriverError>;

    /// True when the selector matches a currently visible element.
    async fn is_selector_visible(&self, page: PageId, selector: &str)
        -> Result<bool, DriverError>;

    /// Wait for the selector to appear using a live mutation watch on the
    /// page (not polling). Returns whether it appeared within the deadline.
    async fn wait_for_selector(
        &self,
        page: PageId,
        selector: &str,
        deadline: Duration,
    ) -> Result<bool, DriverError>;

    /// Click the center of the first element matching the selector.
    async fn click(&self, page: PageId, selector: &str, deadline: Duration)
        -> Result<(), DriverError>;

    /// Focus the element and type text one keystroke at a time.
    async fn type_text(
        &self,
        page: PageId,
        selector: &str,
        text: &str,
        keystroke_delay: Duration,
        deadline: Duration,
    ) -> Result<(), DriverError>;

    /// Dispatch a single named key (e.g. "Enter", "Tab", "Escape").
    async fn press_key(&self, page: PageId, key: &str) -> Result<(), DriverError>;

    async fn set_cookies(&self, page: PageId, cookies: &[CookieParam])
        -> Result<(), DriverError>;

    async fn get_cookies(
        &self,
        page: PageId,
        urls: &[String],
    ) -> Result<Vec<CookieParam>, DriverError>;

    async fn set_extra_headers(
        &self,
        page: PageId,
        headers: &HashMap<String, String>,
    ) -> Result<(), DriverError>;

    async fn set_device_metrics(
        &self,
        page: PageId,
        width: u32,
        height: u32,
    ) -> Result<(), DriverError>;

    async fn set_user_agent(&self, page: PageId, user_agent: &str) -> Result<(), DriverError>;

    /// Block requests whose URLs match any of the given patterns.
    async fn set_blocked_urls(&self, page: PageId, patterns: &[String])
        -> Result<(), DriverError>;

    /// Install a script evaluated in every new document on this page.
    async fn add_init_script(&self, page: PageId, source: &str) -> Result<(), DriverError>;

    /// Serialized HTML of the current document.
    async fn page_content(&self, page: PageId) -> Result<String, DriverError>;

    async fn current_url(&self, page: PageId) -> Result<String, DriverError>;

    async fn close_page(&self, page: PageId) -> Result<(), DriverError>;

    /// Subscribe to page lifecycle notifications.
    fn subscribe(&self) -> broadcast::Receiver<PageEvent>;

    /// Tear the driver down, closing the browser process.
    async fn shutdown(&self);
}

#[derive(Clone, Debug)]
struct TargetContext {
    target_id: Option<String>,
    cdp_session: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetCreatedParams {
    target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDestroyedParams {
    target_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachedToTargetParams {
    session_id: String,
    target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetachedFromTargetParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageLifecycleParams {
    name: String,
}

/// Driver implementation with pluggable transport.
pub struct ChromiumDriver {
    cfg: DriverConfig,
    transport: Arc<dyn CdpTransport>,
    pages: DashMap<PageId, TargetContext>,
    targets: DashMap<String, PageId>,
    sessions: DashMap<String, PageId>,
    recent_urls: DashMap<PageId, String>,
    events: broadcast::Sender<PageEvent>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChromiumDriver {
    pub fn new(cfg: DriverConfig) -> Self {
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cfg.clone()));
        Self::with_transport(cfg, transport)
    }

    pub fn with_transport(cfg: DriverConfig, transport: Arc<dyn CdpTransport>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            cfg,
            transport,
            pages: DashMap::new(),
            targets: DashMap::new(),
            sessions: DashMap::new(),
            recent_urls: DashMap::new(),
            events,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.cfg
    }

    /// Connect the transport and start the event pump. Idempotent.
    pub async fn start(self: &Arc<Self>) -> Result<(), DriverError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        let pump = tokio::spawn(Self::event_loop(Arc::clone(self)));
        self.tasks.lock().await.push(pump);
        info!(target: "cdp-driver", "event pump started");
        Ok(())
    }

    async fn event_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => {
                    match event {
                        Some(ev) => self.process_event(ev),
                        None => {
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            self.handle_transport_disconnect();
                            sleep(Duration::from_millis(250)).await;
                        }
                    }
                }
            }
        }
        debug!(target: "cdp-driver", "event pump exiting");
    }

    fn handle_transport_disconnect(&self) {
        for entry in self.pages.iter() {
            let _ = self.events.send(PageEvent::Closed { page: *entry.key() });
        }
        self.pages.clear();
        self.targets.clear();
        self.sessions.clear();
        self.recent_urls.clear();
        let _ = self.events.send(PageEvent::TransportError {
            message: "cdp transport disconnected; active pages were reset".into(),
        });
    }

    fn process_event(&self, event: TransportEvent) {
        match event.method.as_str() {
            "Target.targetCreated" => {
                if let Ok(params) =
                    serde_json::from_value::<TargetCreatedParams>(event.params.clone())
                {
                    self.on_target_created(params);
                }
            }
            "Target.targetDestroyed" => {
                if let Ok(params) =
                    serde_json::from_value::<TargetDestroyedParams>(event.params.clone())
                {
                    self.on_target_destroyed(params);
                }
            }
            "Target.attachedToTarget" => {
                if let Ok(params) =
                    serde_json::from_value::<AttachedToTargetParams>(event.params.clone())
                {
                    self.on_target_attached(params);
                }
            }
            "Target.detachedFromTarget" => {
                if let Ok(params) =
                    serde_json::from_value::<DetachedFromTargetParams>(event.params.clone())
                {
                    self.sessions.remove(&params.session_id);
                }
            }
            "Page.lifecycleEvent" => {
                if let Some(page) = event
                    .session_id
                    .as_ref()
                    .and_then(|sid| self.sessions.get(sid).map(|e| *e.value()))
                {
                    if let Ok(params) =
                        serde_json::from_value::<PageLifecycleParams>(event.params)
                    {
                        let _ = self.events.send(PageEvent::Lifecycle {
                            page,
                            phase: params.name.to_ascii_lowercase(),
                        });
                    }
                }
            }
            other => {
                debug!(target: "cdp-driver", method = %other, "unhandled cdp event");
            }
        }
    }

    fn on_target_created(&self, params: TargetCreatedParams) {
        if params.target_info.target_type != "page" {
            return;
        }

        let target_id = params.target_info.target_id;
        let page = PageId::new();
        self.targets.insert(target_id.clone(), page);
        self.pages.insert(
            page,
            TargetContext {
                target_id: Some(target_id),
                cdp_session: None,
            },
        );
        if let Some(url) = params.target_info.url.filter(|u| !u.is_empty()) {
            self.recent_urls.insert(page, url);
        }
        let _ = self.events.send(PageEvent::Opened { page });
    }

    fn on_target_destroyed(&self, params: TargetDestroyedParams) {
        if let Some((_, page)) = self.targets.remove(&params.target_id) {
            self.sessions.retain(|_, v| *v != page);
            self.pages.remove(&page);
            self.recent_urls.remove(&page);
            let _ = self.events.send(PageEvent::Closed { page });
        }
    }

    fn on_target_attached(&self, params: AttachedToTargetParams) {
        if params.target_info.target_type != "page" {
            return;
        }

        if let Some(entry) = self.targets.get(&params.target_info.target_id) {
            let page = *entry.value();
            self.sessions.insert(params.session_id.clone(), page);
            if let Some(mut ctx) = self.pages.get_mut(&page) {
                ctx.cdp_session = Some(params.session_id);
            }
        }
    }

    /// Register a page handle directly. Used by tests that bypass the
    /// Target attach handshake.
    pub fn register_page(&self, page: PageId, target_id: Option<String>, cdp_session: String) {
        if let Some(tid) = target_id.clone() {
            self.targets.insert(tid, page);
        }
        self.sessions.insert(cdp_session.clone(), page);
        self.pages.insert(
            page,
            TargetContext {
                target_id,
                cdp_session: Some(cdp_session),
            },
        );
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, DriverError> {
        self.transport
            .send_command(CommandTarget::Browser, method, params)
            .await
    }

    async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, DriverError> {
        let session = self
            .pages
            .get(&page)
            .and_then(|ctx| ctx.cdp_session.clone())
            .ok_or_else(|| DriverError::SessionClosed(format!("no cdp session for page {page}")))?;
        self.transport
            .send_command(CommandTarget::Session(session), method, params)
            .await
    }

    async fn eval_value(
        &self,
        page: PageId,
        expression: &str,
        await_promise: bool,
    ) -> Result<Value, DriverError> {
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": await_promise,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|d| d.as_str())
                .unwrap_or("script exception");
            return Err(DriverError::Protocol(format!(
                "evaluate raised: {text}"
            )));
        }

        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn wait_for_dom_ready(&self, page: PageId, deadline: Instant) -> Result<(), DriverError> {
        loop {
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout("dom readiness wait timed out".into()));
            }

            let ready = self
                .eval_value(page, "document.readyState", false)
                .await?
                .as_str()
                .map(|state| matches!(state, "interactive" | "complete"))
                .unwrap_or(false);

            if ready {
                return Ok(());
            }

            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Locate the viewport center of the first match for the selector.
    async fn query_center(
        &self,
        page: PageId,
        selector: &str,
    ) -> Result<Option<(f64, f64)>, DriverError> {
        let selector_literal = js_string(selector)?;
        let expression = format!(
            "(() => {{\n  const el = document.querySelector({selector_literal});\n  if (!el) {{ return null; }}\n  const rect = el.getBoundingClientRect();\n  return {{ x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 }};\n}})()"
        );
        let value = self.eval_value(page, &expression, false).await?;
        if value.is_null() {
            return Ok(None);
        }
        let x = value.get("x").and_then(|v| v.as_f64());
        let y = value.get("y").and_then(|v| v.as_f64());
        match (x, y) {
            (Some(x), Some(y)) => Ok(Some((x, y))),
            _ => Err(DriverError::Protocol(
                "query did not return a center point".into(),
            )),
        }
    }

    async fn focus_selector(
        &self,
        page: PageId,
        selector: &str,
        deadline: Instant,
    ) -> Result<(), DriverError> {
        let selector_literal = js_string(selector)?;
        let expression = format!(
            "(() => {{\n  const el = document.querySelector({selector_literal});\n  if (!el) {{ return 'not-found'; }}\n  if (typeof el.focus === 'function') {{ el.focus(); }}\n  return 'focused';\n}})()"
        );

        loop {
            let status = self.eval_value(page, &expression, false).await?;
            match status.as_str() {
                Some("focused") => return Ok(()),
                Some("not-found") => {
                    if Instant::now() >= deadline {
                        return Err(DriverError::TargetNotFound(format!(
                            "selector '{selector}' not found before deadline"
                        )));
                    }
                    sleep(Duration::from_millis(100)).await;
                }
                other => {
                    return Err(DriverError::Protocol(format!(
                        "unexpected focus status: {other:?}"
                    )));
                }
            }
        }
    }

    async fn dispatch_click_at(&self, page: PageId, x: f64, y: f64) -> Result<(), DriverError> {
        let press = json!({
            "type": "mousePressed",
            "x": x,
            "y": y,
            "button": "left",
            "buttons": 1,
            "clickCount": 1,
            "pointerType": "mouse",
        });
        self.send_page_command(page, "Input.dispatchMouseEvent", press)
            .await?;

        let release = json!({
            "type": "mouseReleased",
            "x": x,
            "y": y,
            "button": "left",
            "buttons": 1,
            "clickCount": 1,
            "pointerType": "mouse",
        });
        self.send_page_command(page, "Input.dispatchMouseEvent", release)
            .await?;
        Ok(())
    }
}

/// Quote a string as a JavaScript literal.
fn js_string(raw: &str) -> Result<String, DriverError> {
    serde_json::to_string(raw).map_err(|err| DriverError::Protocol(err.to_string()))
}

fn named_key_code(key: &str) -> Option<(i64, &'static str)> {
    match key {
        "Enter" => Some((13, "\r")),
        "Tab" => Some((9, "\t")),
        "Escape" => Some((27, "")),
        _ => None,
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn create_page(&self, url: &str) -> Result<PageId, DriverError> {
        let response = self
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DriverError::Protocol("createTarget missing targetId".into()))?
            .to_string();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(entry) = self.targets.get(&target_id) {
                let page = *entry.value();
                let attached = self
                    .pages
                    .get(&page)
                    .map(|ctx| ctx.cdp_session.is_some())
                    .unwrap_or(false);
                if attached {
                    return Ok(page);
                }
            }

            if Instant::now() >= deadline {
                return Err(DriverError::Timeout(
                    "timed out waiting for target attach".into(),
                ));
            }

            sleep(Duration::from_millis(50)).await;
        }
    }

    async fn navigate(
        &self,
        page: PageId,
        url: &str,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        self.send_page_command(page, "Page.navigate", json!({ "url": url }))
            .await?;
        self.recent_urls.insert(page, url.to_string());

        let start = Instant::now();
        let deadline_at = start
            .checked_add(deadline)
            .unwrap_or_else(|| start + Duration::from_secs(30));
        self.wait_for_dom_ready(page, deadline_at).await
    }

    async fn evaluate(&self, page: PageId, expression: &str) -> Result<Value, DriverError> {
        self.eval_value(page, expression, false).await
    }

    async fn evaluate_async(
        &self,
        page: PageId,
        expression: &str,
        deadline: Duration,
    ) -> Result<Value, DriverError> {
        match tokio::time::timeout(deadline, self.eval_value(page, expression, true)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(
                "async evaluation exceeded deadline".into(),
            )),
        }
    }

    async fn is_selector_visible(
        &self,
        page: PageId,
        selector: &str,
    ) -> Result<bool, DriverError> {
        let selector_literal = js_string(selector)?;
        let expression = format!(
            "(() => {{\n  let el;\n  try {{ el = document.querySelector({selector_literal}); }} catch (err) {{ return false; }}\n  if (!el) {{ return false; }}\n  const style = getComputedStyle(el);\n  const rect = el.getBoundingClientRect();\n  return rect.width > 0 && rect.height > 0 && style.display !== 'none' && style.visibility !== 'hidden' && style.opacity !== '0';\n}})()"
        );
        Ok(self
            .eval_value(page, &expression, false)
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    async fn wait_for_selector(
        &self,
        page: PageId,
        selector: &str,
        deadline: Duration,
    ) -> Result<bool, DriverError> {
        let selector_literal = js_string(selector)?;
        let timeout_ms = deadline.as_millis().min(u128::from(u32::MAX)) as u64;
        // MutationObserver promise; resolves early when the node lands.
        let expression = format!(
            "(() => new Promise((resolve) => {{\n  const probe = () => {{\n    try {{ return document.querySelector({selector_literal}); }} catch (err) {{ return null; }}\n  }};\n  if (probe()) {{ resolve(true); return; }}\n  const observer = new MutationObserver(() => {{\n    if (probe()) {{ observer.disconnect(); resolve(true); }}\n  }});\n  observer.observe(document.documentElement, {{ childList: true, subtree: true, attributes: true }});\n  setTimeout(() => {{ observer.disconnect(); resolve(!!probe()); }}, {timeout_ms});\n}}))()"
        );

        let grace = deadline + Duration::from_secs(2);
        Ok(self
            .evaluate_async(page, &expression, grace)
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    async fn click(
        &self,
        page: PageId,
        selector: &str,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        let deadline_at = Instant::now() + deadline;
        let (x, y) = loop {
            if let Some(center) = self.query_center(page, selector).await? {
                break center;
            }
            if Instant::now() >= deadline_at {
                return Err(DriverError::TargetNotFound(format!(
                    "click target not found for selector '{selector}'"
                )));
            }
            sleep(Duration::from_millis(100)).await;
        };

        self.dispatch_click_at(page, x, y).await
    }

    async fn type_text(
        &self,
        page: PageId,
        selector: &str,
        text: &str,
        keystroke_delay: Duration,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        self.focus_selector(page, selector, Instant::now() + deadline)
            .await?;

        for ch in text.chars() {
            self.send_page_command(
                page,
                "Input.insertText",
                json!({ "text": ch.to_string() }),
            )
            .await?;
            if !keystroke_delay.is_zero() {
                sleep(keystroke_delay).await;
            }
        }
        Ok(())
    }

    async fn press_key(&self, page: PageId, key: &str) -> Result<(), DriverError> {
        let (code, text) = named_key_code(key)
            .ok_or_else(|| DriverError::Protocol(format!("unsupported key '{key}'")))?;

        self.send_page_command(
            page,
            "Input.dispatchKeyEvent",
            json!({
                "type": "rawKeyDown",
                "key": key,
                "code": key,
                "windowsVirtualKeyCode": code,
                "nativeVirtualKeyCode": code,
            }),
        )
        .await?;

        if !text.is_empty() {
            self.send_page_command(
                page,
                "Input.dispatchKeyEvent",
                json!({ "type": "char", "text": text, "key": key }),
            )
            .await?;
        }

        self.send_page_command(
            page,
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": key,
                "code": key,
                "windowsVirtualKeyCode": code,
                "nativeVirtualKeyCode": code,
            }),
        )
        .await?;
        Ok(())
    }

    async fn set_cookies(
        &self,
        page: PageId,
        cookies: &[CookieParam],
    ) -> Result<(), DriverError> {
        if cookies.is_empty() {
            return Ok(());
        }
        let payload =
            serde_json::to_value(cookies).map_err(|err| DriverError::Protocol(err.to_string()))?;
        self.send_page_command(page, "Network.setCookies", json!({ "cookies": payload }))
            .await?;
        Ok(())
    }

    async fn get_cookies(
        &self,
        page: PageId,
        urls: &[String],
    ) -> Result<Vec<CookieParam>, DriverError> {
        let params = if urls.is_empty() {
            Value::Object(Default::default())
        } else {
            json!({ "urls": urls })
        };
        let response = self
            .send_page_command(page, "Network.getCookies", params)
            .await?;
        let cookies = response
            .get("cookies")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(cookies).map_err(|err| DriverError::Protocol(err.to_string()))
    }

    async fn set_extra_headers(
        &self,
        page: PageId,
        headers: &HashMap<String, String>,
    ) -> Result<(), DriverError> {
        self.send_page_command(page, "Network.enable", Value::Object(Default::default()))
            .await?;
        self.send_page_command(
            page,
            "Network.setExtraHTTPHeaders",
            json!({ "headers": headers }),
        )
        .await?;
        Ok(())
    }

    async fn set_device_metrics(
        &self,
        page: PageId,
        width: u32,
        height: u32,
    ) -> Result<(), DriverError> {
        self.send_page_command(
            page,
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1.0,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    async fn set_user_agent(&self, page: PageId, user_agent: &str) -> Result<(), DriverError> {
        self.send_page_command(
            page,
            "Emulation.setUserAgentOverride",
            json!({ "userAgent": user_agent }),
        )
        .await?;
        Ok(())
    }

    async fn set_blocked_urls(
        &self,
        page: PageId,
        patterns: &[String],
    ) -> Result<(), DriverError> {
        self.send_page_command(page, "Network.enable", Value::Object(Default::default()))
            .await?;
        self.send_page_command(page, "Network.setBlockedURLs", json!({ "urls": patterns }))
            .await?;
        Ok(())
    }

    async fn add_init_script(&self, page: PageId, source: &str) -> Result<(), DriverError> {
        self.send_page_command(
            page,
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": source }),
        )
        .await?;
        Ok(())
    }

    async fn page_content(&self, page: PageId) -> Result<String, DriverError> {
        let value = self
            .eval_value(page, "document.documentElement.outerHTML", false)
            .await?;
        value
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| DriverError::Protocol("page content was not a string".into()))
    }

    async fn current_url(&self, page: PageId) -> Result<String, DriverError> {
        let value = self.eval_value(page, "window.location.href", false).await?;
        Ok(value
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn close_page(&self, page: PageId) -> Result<(), DriverError> {
        let target_id = self.pages.get(&page).and_then(|ctx| ctx.target_id.clone());
        if let Some(target_id) = target_id {
            self.send_command("Target.closeTarget", json!({ "targetId": target_id }))
                .await?;
        }
        self.pages.remove(&page);
        self.recent_urls.remove(&page);
        self.sessions.retain(|_, v| *v != page);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            handle.abort();
        }
        // Best effort: ask the browser to close before the child is killed.
        if let Err(err) = self
            .send_command("Browser.close", Value::Object(Default::default()))
            .await
        {
            debug!(target: "cdp-driver", ?err, "browser close command failed");
        }
        self.pages.clear();
        self.targets.clear();
        self.sessions.clear();
        self.recent_urls.clear();
        warn!(target: "cdp-driver", "driver shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Transport returning canned responses and recording every command.
    struct MockTransport {
        commands: StdMutex<Vec<(String, Value)>>,
        scripted: StdMutex<HashMap<String, VecDeque<Value>>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                commands: StdMutex::new(Vec::new()),
                scripted: StdMutex::new(HashMap::new()),
            }
        }

        fn script(&self, method: &str, response: Value) {
            self.scripted
                .lock()
                .unwrap()
                .entry(method.to_string())
                .or_default()
                .push_back(response);
        }

        fn recorded(&self) -> Vec<(String, Value)> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CdpTransport for MockTransport {
        async fn start(&self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            futures::future::pending().await
        }

        async fn send_command(
            &self,
            _target: CommandTarget,
            method: &str,
            params: Value,
        ) -> Result<Value, DriverError> {
            self.commands
                .lock()
                .unwrap()
                .push((method.to_string(), params));
            let scripted = self
                .scripted
                .lock()
                .unwrap()
                .get_mut(method)
                .and_then(|queue| queue.pop_front());
            Ok(scripted.unwrap_or_else(|| Value::Object(Default::default())))
        }
    }

    fn eval_result(value: Value) -> Value {
        json!({ "result": { "value": value } })
    }

    fn driver_with_page() -> (Arc<ChromiumDriver>, Arc<MockTransport>, PageId) {
        let transport = Arc::new(MockTransport::new());
        let driver = Arc::new(ChromiumDriver::with_transport(
            DriverConfig::default(),
            transport.clone(),
        ));
        let page = PageId::new();
        driver.register_page(page, Some("target-1".into()), "session-1".into());
        (driver, transport, page)
    }

    #[tokio::test]
    async fn navigate_issues_page_navigate_and_waits_for_readiness() {
        let (driver, transport, page) = driver_with_page();
        transport.script("Runtime.evaluate", eval_result(json!("complete")));

        driver
            .navigate(page, "https://example.com", Duration::from_secs(5))
            .await
            .expect("navigate");

        let commands = transport.recorded();
        assert!(commands.iter().any(|(m, p)| {
            m == "Page.navigate" && p.get("url").and_then(|v| v.as_str()) == Some("https://example.com")
        }));
        assert!(commands.iter().any(|(m, _)| m == "Runtime.evaluate"));
    }

    #[tokio::test]
    async fn click_dispatches_press_and_release_at_center() {
        let (driver, transport, page) = driver_with_page();
        transport.script(
            "Runtime.evaluate",
            eval_result(json!({ "x": 40.0, "y": 80.0 })),
        );

        driver
            .click(page, "#submit", Duration::from_secs(1))
            .await
            .expect("click");

        let mouse: Vec<_> = transport
            .recorded()
            .into_iter()
            .filter(|(m, _)| m == "Input.dispatchMouseEvent")
            .collect();
        assert_eq!(mouse.len(), 2);
        assert_eq!(
            mouse[0].1.get("type").and_then(|v| v.as_str()),
            Some("mousePressed")
        );
        assert_eq!(
            mouse[1].1.get("type").and_then(|v| v.as_str()),
            Some("mouseReleased")
        );
        assert_eq!(mouse[0].1.get("x").and_then(|v| v.as_f64()), Some(40.0));
    }

    #[tokio::test]
    async fn type_text_focuses_then_inserts_each_keystroke() {
        let (driver, transport, page) = driver_with_page();
        transport.script("Runtime.evaluate", eval_result(json!("focused")));

        driver
            .type_text(
                page,
                "input[name=q]",
                "hi",
                Duration::ZERO,
                Duration::from_secs(1),
            )
            .await
            .expect("type");

        let inserts: Vec<_> = transport
            .recorded()
            .into_iter()
            .filter(|(m, _)| m == "Input.insertText")
            .map(|(_, p)| p.get("text").and_then(|v| v.as_str()).unwrap().to_string())
            .collect();
        assert_eq!(inserts, vec!["h", "i"]);
    }

    #[tokio::test]
    async fn press_enter_sends_key_sequence() {
        let (driver, transport, page) = driver_with_page();
        driver.press_key(page, "Enter").await.expect("press");

        let kinds: Vec<_> = transport
            .recorded()
            .into_iter()
            .filter(|(m, _)| m == "Input.dispatchKeyEvent")
            .map(|(_, p)| p.get("type").and_then(|v| v.as_str()).unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["rawKeyDown", "char", "keyUp"]);
    }

    #[tokio::test]
    async fn set_cookies_serializes_camel_case_params() {
        let (driver, transport, page) = driver_with_page();
        let cookie = CookieParam {
            name: "FTConsent".into(),
            value: "true".into(),
            domain: Some(".ft.com".into()),
            path: Some("/".into()),
            http_only: Some(true),
            ..Default::default()
        };

        driver.set_cookies(page, &[cookie]).await.expect("cookies");

        let (_, params) = transport
            .recorded()
            .into_iter()
            .find(|(m, _)| m == "Network.setCookies")
            .expect("setCookies issued");
        let first = &params["cookies"][0];
        assert_eq!(first["name"], "FTConsent");
        assert_eq!(first["domain"], ".ft.com");
        assert_eq!(first["httpOnly"], true);
        assert!(first.get("sameSite").is_none());
    }

    #[tokio::test]
    async fn page_command_without_session_reports_session_closed() {
        let transport = Arc::new(MockTransport::new());
        let driver = ChromiumDriver::with_transport(DriverConfig::default(), transport);
        let page = PageId::new();

        let err = driver.evaluate(page, "1 + 1").await.unwrap_err();
        assert!(matches!(err, DriverError::SessionClosed(_)));
    }

    #[test]
    fn target_events_maintain_registry() {
        let transport = Arc::new(MockTransport::new());
        let driver = ChromiumDriver::with_transport(DriverConfig::default(), transport);

        driver.process_event(TransportEvent {
            method: "Target.targetCreated".into(),
            params: json!({
                "targetInfo": { "targetId": "t1", "type": "page", "url": "about:blank" }
            }),
            session_id: None,
        });
        driver.process_event(TransportEvent {
            method: "Target.attachedToTarget".into(),
            params: json!({
                "sessionId": "s1",
                "targetInfo": { "targetId": "t1", "type": "page" }
            }),
            session_id: None,
        });

        let page = *driver.targets.get("t1").unwrap().value();
        assert_eq!(
            driver.pages.get(&page).unwrap().cdp_session.as_deref(),
            Some("s1")
        );

        driver.process_event(TransportEvent {
            method: "Target.targetDestroyed".into(),
            params: json!({ "targetId": "t1" }),
            session_id: None,
        });
        assert!(driver.pages.get(&page).is_none());
    }
}
