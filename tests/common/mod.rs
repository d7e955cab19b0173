//! Shared recording driver for integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cdp_driver::{CookieParam, Driver, DriverError, PageEvent, PageId};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Driver double that records every operation and serves canned page
/// state, so executor flows run without a browser.
#[derive(Default)]
pub struct RecordingDriver {
    pub navigations: Mutex<Vec<String>>,
    pub clicks: Mutex<Vec<String>>,
    pub typed: Mutex<Vec<(String, String)>>,
    pub keys: Mutex<Vec<String>>,
    pub visible: Mutex<HashSet<String>>,
    pub harvest: Mutex<Value>,
    /// When set, page probes and interactions fail with a CDP error.
    pub failing: AtomicBool,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self {
            harvest: Mutex::new(Value::Null),
            ..Default::default()
        }
    }

    pub fn show(&self, selector: &str) {
        self.visible.lock().unwrap().insert(selector.to_string());
    }

    pub fn fail_everything(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<(), DriverError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DriverError::CdpIo("injected failure".into()))
        } else {
            Ok(())
        }
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.typed.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.clicks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn create_page(&self, _url: &str) -> Result<PageId, DriverError> {
        Ok(PageId::new())
    }

    async fn navigate(
        &self,
        _page: PageId,
        url: &str,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn evaluate(&self, _page: PageId, expression: &str) -> Result<Value, DriverError> {
        self.check_failure()?;
        if expression.contains("__webpilotObserver") {
            return Ok(json!("armed"));
        }
        if expression.contains("querySelectorAll('*')") {
            return Ok(self.harvest.lock().unwrap().clone());
        }
        if expression.contains("#cookie-banner") {
            return Ok(json!(0));
        }
        if expression.contains("1 + 1") {
            return Ok(json!(2));
        }
        Ok(json!(""))
    }

    async fn evaluate_async(
        &self,
        _page: PageId,
        _expression: &str,
        _deadline: Duration,
    ) -> Result<Value, DriverError> {
        Ok(Value::Null)
    }

    async fn is_selector_visible(
        &self,
        _page: PageId,
        selector: &str,
    ) -> Result<bool, DriverError> {
        self.check_failure()?;
        Ok(self.visible.lock().unwrap().contains(selector))
    }

    async fn wait_for_selector(
        &self,
        _page: PageId,
        selector: &str,
        _deadline: Duration,
    ) -> Result<bool, DriverError> {
        self.check_failure()?;
        Ok(self.visible.lock().unwrap().contains(selector))
    }

    async fn click(
        &self,
        _page: PageId,
        selector: &str,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        self.check_failure()?;
        self.clicks.lock().unwrap().push(selector.to_string());
        Ok(())
    }

    async fn type_text(
        &self,
        _page: PageId,
        selector: &str,
        text: &str,
        _keystroke_delay: Duration,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        self.typed
            .lock()
            .unwrap()
            .push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn press_key(&self, _page: PageId, key: &str) -> Result<(), DriverError> {
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn set_cookies(
        &self,
        _page: PageId,
        _cookies: &[CookieParam],
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn get_cookies(
        &self,
        _page: PageId,
        _urls: &[String],
    ) -> Result<Vec<CookieParam>, DriverError> {
        Ok(Vec::new())
    }

    async fn set_extra_headers(
        &self,
        _page: PageId,
        _headers: &HashMap<String, String>,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn set_device_metrics(
        &self,
        _page: PageId,
        _width: u32,
        _height: u32,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn set_user_agent(&self, _page: PageId, _user_agent: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn set_blocked_urls(
        &self,
        _page: PageId,
        _patterns: &[String],
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn add_init_script(&self, _page: PageId, _source: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn page_content(&self, _page: PageId) -> Result<String, DriverError> {
        Ok("<html><body></body></html>".into())
    }

    async fn current_url(&self, _page: PageId) -> Result<String, DriverError> {
        Ok("about:blank".into())
    }

    async fn close_page(&self, _page: PageId) -> Result<(), DriverError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        broadcast::channel(1).1
    }

    async fn shutdown(&self) {}
}
