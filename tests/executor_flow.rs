//! End-to-end executor flows against the recording driver.

mod common;

use std::sync::Arc;

use cdp_driver::{Driver, PageId};
use common::RecordingDriver;
use tempfile::TempDir;
use tokio::sync::mpsc;

use webpilot_cli::config::Settings;
use webpilot_cli::cookies::CookieStore;
use webpilot_cli::errors::PilotError;
use webpilot_cli::executor::{CommandOutcome, ExecState, Executor, ProgressEvent};
use webpilot_cli::plan::parse_plan;
use webpilot_cli::session::BrowserSession;

struct Harness {
    driver: Arc<RecordingDriver>,
    executor: Executor,
    progress_rx: mpsc::UnboundedReceiver<ProgressEvent>,
    _cookie_dir: TempDir,
}

fn harness() -> Harness {
    let driver = Arc::new(RecordingDriver::new());
    let dyn_driver: Arc<dyn Driver> = driver.clone();
    let session = BrowserSession::from_parts(dyn_driver, PageId::new());

    let cookie_dir = TempDir::new().unwrap();
    let cookies = Arc::new(CookieStore::new(cookie_dir.path(), 30));

    let mut settings = Settings::default();
    settings.resolver.settle_delay_ms = 0;
    settings.resolver.keystroke_delay_ms = 0;
    settings.resolver.element_timeout_ms = 100;

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let executor = Executor::new(
        &session,
        cookies,
        None,
        Arc::new(Vec::new()),
        Arc::new(settings),
        progress_tx,
    );

    Harness {
        driver,
        executor,
        progress_rx,
        _cookie_dir: cookie_dir,
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

const YOUTUBE_REPLY: &str = r#"Here is your plan:
{
  "url": "https://youtube.com",
  "actions": [
    {"type": "navigate", "value": "https://youtube.com"},
    {"type": "type", "target": "search box", "value": "python tutorials", "press_enter": true}
  ]
}
Hope this helps!"#;

#[tokio::test]
async fn youtube_scenario_navigates_once_and_types_the_query() {
    let mut h = harness();
    // The site's search input exists; the category heuristic should
    // find it from the "search box" description.
    h.driver.show("input[name=\"search_query\"]");

    let plan = parse_plan(YOUTUBE_REPLY).unwrap();
    let outcome = h.executor.run(&plan).await.unwrap();

    // The top-level url and the navigate action point at the same
    // place: exactly one navigation event.
    assert_eq!(h.driver.navigations(), vec!["https://youtube.com/"]);

    let typed = h.driver.typed();
    assert_eq!(typed.len(), 1);
    assert_eq!(typed[0].0, "input[name=\"search_query\"]");
    assert_eq!(typed[0].1, "python tutorials");
    assert_eq!(h.driver.keys(), vec!["Enter"]);

    assert!(matches!(outcome, CommandOutcome::Message(ref m) if m.contains("successfully")));
    assert_eq!(*h.executor.state(), ExecState::Done);
}

#[tokio::test]
async fn distinct_navigations_both_load() {
    let mut h = harness();
    let plan = parse_plan(
        r#"{
            "url": "https://example.com",
            "actions": [{"type": "navigate", "value": "https://example.com/pricing"}]
        }"#,
    )
    .unwrap();

    h.executor.run(&plan).await.unwrap();
    assert_eq!(
        h.driver.navigations(),
        vec!["https://example.com/", "https://example.com/pricing"]
    );
}

#[tokio::test]
async fn missing_click_target_fails_the_plan_and_halts() {
    let mut h = harness();
    let plan = parse_plan(
        r#"{
            "url": "https://example.com",
            "actions": [
                {"type": "click", "target": "checkout button"},
                {"type": "type", "target": "address input", "value": "should never run"}
            ]
        }"#,
    )
    .unwrap();

    let err = h.executor.run(&plan).await.unwrap_err();
    assert!(matches!(err, PilotError::ElementNotFound(_)));
    assert!(err.to_string().contains("checkout button"));

    // Subsequent steps never execute.
    assert!(h.driver.typed().is_empty());
    assert_eq!(*h.executor.state(), ExecState::Failed);

    let events = drain(&mut h.progress_rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Failed { reason } if reason.contains("checkout button"))));
}

#[tokio::test]
async fn wait_target_never_appearing_does_not_fail_the_plan() {
    let mut h = harness();
    h.driver.show("input[name=\"search_query\"]");

    let plan = parse_plan(
        r##"{
            "url": "https://example.com",
            "actions": [
                {"type": "wait", "wait_for": "#never-appears"},
                {"type": "type", "target": "search box", "value": "still ran"}
            ]
        }"##,
    )
    .unwrap();

    h.executor.run(&plan).await.unwrap();
    assert_eq!(h.driver.typed().len(), 1);
    assert_eq!(*h.executor.state(), ExecState::Done);
}

#[tokio::test]
async fn progress_events_bracket_the_run() {
    let mut h = harness();
    let plan = parse_plan(r#"{"url": "https://example.com", "actions": []}"#).unwrap();
    h.executor.run(&plan).await.unwrap();

    let events = drain(&mut h.progress_rx);
    assert!(matches!(events.first(), Some(ProgressEvent::PlanReceived { .. })));
    assert!(matches!(events.last(), Some(ProgressEvent::Completed)));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Navigating { url } if url == "https://example.com/")));
}

#[tokio::test]
async fn navigation_persists_cookies_for_the_domain() {
    let mut h = harness();
    let plan = parse_plan(r#"{"url": "https://example.com", "actions": []}"#).unwrap();
    h.executor.run(&plan).await.unwrap();

    assert!(h._cookie_dir.path().join("example.com.json").exists());
}

#[tokio::test]
async fn overlay_pass_swallows_driver_failures() {
    let driver = Arc::new(RecordingDriver::new());
    driver.fail_everything();
    let dyn_driver: Arc<dyn Driver> = driver;

    // Must return normally even when every probe and click errors.
    webpilot_cli::overlay::OverlayHandler::dismiss_overlays(
        &dyn_driver,
        PageId::new(),
        "https://www.ft.com/content/abc",
    )
    .await;
}
