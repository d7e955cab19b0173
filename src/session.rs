//! Browser session lifecycle.
//!
//! A session owns the driver handle, the active page and the per-page
//! element resolver. The session is shared between the foreground
//! executor and the background health monitor; teardown closes the
//! underlying handles first, so an in-flight plan step fails with a
//! session-closed driver error instead of observing corrupt state.

use std::sync::Arc;

use cdp_driver::{ChromiumDriver, Driver, DriverConfig, PageId};
use element_resolver::ElementResolver;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::PilotResult;

/// Watches for DOM mutations and keeps elements the resolver marked with
/// `data-pilot-target` revealed through re-renders.
pub const INSTRUMENTATION_JS: &str = r#"
(() => {
  if (window.__webpilotObserver) return 'armed';
  const reveal = (el) => {
    let current = el;
    while (current) {
      const style = getComputedStyle(current);
      if (style.display === 'none') current.style.setProperty('display', 'block', 'important');
      if (style.visibility === 'hidden') current.style.setProperty('visibility', 'visible', 'important');
      if (style.opacity === '0') current.style.setProperty('opacity', '1', 'important');
      current = current.parentElement;
    }
  };
  window.__webpilotObserver = new MutationObserver((mutations) => {
    for (const mutation of mutations) {
      const target = mutation.target;
      if (target && target.nodeType === Node.ELEMENT_NODE && target.hasAttribute('data-pilot-target')) {
        reveal(target);
      }
    }
  });
  window.__webpilotObserver.observe(document.body || document.documentElement, {
    childList: true,
    subtree: true,
    attributes: true
  });
  return 'armed';
})()
"#;

/// Compact one-line-per-element summary of the interactive DOM, fed to
/// the planning LLM as page state.
const SUMMARY_JS: &str = r#"
(() => {
  const lines = [];
  const seen = new Set();
  for (const el of document.querySelectorAll('a, button, input, textarea, select')) {
    const style = getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0 || style.display === 'none' || style.visibility === 'hidden') continue;
    const tag = el.tagName.toLowerCase();
    let line = tag;
    if (el.id) line += '#' + el.id;
    if (el.name) line += ' name=' + el.name;
    if (el.placeholder) line += ' placeholder="' + el.placeholder + '"';
    const label = el.getAttribute('aria-label');
    if (label) line += ' aria-label="' + label + '"';
    const text = (el.textContent || '').trim().slice(0, 60);
    if (text) line += ' "' + text + '"';
    if (!seen.has(line)) {
      seen.add(line);
      lines.push(line);
    }
  }
  return lines.join('\n');
})()
"#;

/// Cap on the page-state summary shipped to the LLM.
const SUMMARY_MAX_CHARS: usize = 6000;

pub struct BrowserSession {
    pub driver: Arc<dyn Driver>,
    pub page: PageId,
    pub resolver: Arc<ElementResolver>,
}

/// Session slot shared by the executor and the health monitor. `None`
/// while a rebuild is in flight.
pub type SharedSession = Arc<RwLock<Option<BrowserSession>>>;

impl BrowserSession {
    /// Launch a fresh browser, open the working page and apply the
    /// baseline emulation settings.
    pub async fn launch(settings: &Settings) -> PilotResult<Self> {
        let cfg = DriverConfig {
            executable: settings
                .browser
                .executable
                .clone()
                .or_else(cdp_driver::detect_chrome_executable)
                .unwrap_or_default(),
            user_data_dir: settings.browser.user_data_dir.clone(),
            headless: settings.browser.headless,
            command_deadline_ms: settings.browser.default_timeout_ms,
            ..DriverConfig::default()
        };

        let driver = Arc::new(ChromiumDriver::new(cfg));
        driver.start().await?;
        let page = driver.create_page("about:blank").await?;

        driver
            .set_device_metrics(
                page,
                settings.browser.viewport_width,
                settings.browser.viewport_height,
            )
            .await?;
        if let Some(user_agent) = &settings.browser.user_agent {
            driver.set_user_agent(page, user_agent).await?;
        }
        if !settings.browser.blocked_url_patterns.is_empty() {
            driver
                .set_blocked_urls(page, &settings.browser.blocked_url_patterns)
                .await?;
        }
        driver.add_init_script(page, INSTRUMENTATION_JS).await?;

        let driver: Arc<dyn Driver> = driver;
        let resolver = Arc::new(ElementResolver::new(driver.clone()));

        info!(target: "session", %page, "browser session started");
        Ok(Self {
            driver,
            page,
            resolver,
        })
    }

    /// Assemble a session from existing parts. Used by tests with a
    /// mock driver.
    pub fn from_parts(driver: Arc<dyn Driver>, page: PageId) -> Self {
        let resolver = Arc::new(ElementResolver::new(driver.clone()));
        Self {
            driver,
            page,
            resolver,
        }
    }

    /// Apply per-domain overrides from settings for the upcoming
    /// navigation.
    pub async fn apply_domain_overrides(&self, settings: &Settings, url: &str) {
        let Ok(host) = crate::cookies::domain_of(url) else {
            return;
        };
        let Some(overrides) = settings.domain_overrides(&host) else {
            return;
        };

        debug!(target: "session", host, "applying domain overrides");
        if !overrides.headers.is_empty() {
            if let Err(err) = self
                .driver
                .set_extra_headers(self.page, &overrides.headers)
                .await
            {
                warn!(target: "session", ?err, "failed to apply domain headers");
            }
        }
        if !overrides.cookies.is_empty() {
            if let Err(err) = self.driver.set_cookies(self.page, &overrides.cookies).await {
                warn!(target: "session", ?err, "failed to apply domain cookies");
            }
        }
        if let Some(viewport) = overrides.viewport {
            if let Err(err) = self
                .driver
                .set_device_metrics(self.page, viewport.width, viewport.height)
                .await
            {
                warn!(target: "session", ?err, "failed to apply domain viewport");
            }
        }
        if let Some(user_agent) = &overrides.user_agent {
            if let Err(err) = self.driver.set_user_agent(self.page, user_agent).await {
                warn!(target: "session", ?err, "failed to apply domain user agent");
            }
        }
    }

    /// Re-arm DOM instrumentation on the current document. The init
    /// script covers fresh documents; this covers the one already loaded.
    pub async fn rearm_instrumentation(&self) {
        if let Err(err) = self.driver.evaluate(self.page, INSTRUMENTATION_JS).await {
            warn!(target: "session", ?err, "failed to re-arm instrumentation");
        }
    }

    /// Close underlying handles: page first, then the browser process.
    pub async fn teardown(&self) {
        if let Err(err) = self.driver.close_page(self.page).await {
            debug!(target: "session", ?err, "page close failed during teardown");
        }
        self.driver.shutdown().await;
        info!(target: "session", "browser session torn down");
    }
}

/// Capture the interactive-element summary for the planning prompt.
pub async fn capture_page_summary(driver: &Arc<dyn Driver>, page: PageId) -> String {
    match driver.evaluate(page, SUMMARY_JS).await {
        Ok(value) => {
            let mut summary = value.as_str().unwrap_or_default().to_string();
            if summary.len() > SUMMARY_MAX_CHARS {
                summary.truncate(SUMMARY_MAX_CHARS);
                summary.push_str("\n... [truncated]");
            }
            summary
        }
        Err(err) => {
            warn!(target: "session", ?err, "failed to capture page summary");
            String::new()
        }
    }
}
