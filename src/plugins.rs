//! Static plugin registry.
//!
//! Plugins implement a fixed capability surface (`initialize`,
//! `before_navigation`, `after_navigation`) and are constructed from a
//! compiled-in name-to-factory mapping. Unknown names are a
//! configuration error; there is no dynamic discovery or code loading.

use std::sync::Arc;

use async_trait::async_trait;
use cdp_driver::{Driver, PageId};
use tracing::warn;

use crate::config::{ConfigError, PluginSettings};
use crate::errors::PilotResult;

#[async_trait]
pub trait Plugin: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Called once when the session starts (and again after a rebuild).
    async fn initialize(&self, _driver: &Arc<dyn Driver>, _page: PageId) -> PilotResult<()> {
        Ok(())
    }

    async fn before_navigation(
        &self,
        _driver: &Arc<dyn Driver>,
        _page: PageId,
        _url: &str,
    ) -> PilotResult<()> {
        Ok(())
    }

    async fn after_navigation(
        &self,
        _driver: &Arc<dyn Driver>,
        _page: PageId,
        _url: &str,
    ) -> PilotResult<()> {
        Ok(())
    }
}

/// URL patterns blocked by the ad blocker.
const AD_PATTERNS: &[&str] = &[
    "*://*/ads/*",
    "*://*/adserver/*",
    "*://*/banner/*",
    "*://*/sponsor/*",
    "*://*/tracking/*",
    "*://*/analytics/*",
];

/// Blocks common ad and tracker URL patterns at the network layer.
#[derive(Debug)]
pub struct AdBlocker;

#[async_trait]
impl Plugin for AdBlocker {
    fn name(&self) -> &'static str {
        "adblocker"
    }

    async fn initialize(&self, driver: &Arc<dyn Driver>, page: PageId) -> PilotResult<()> {
        let patterns: Vec<String> = AD_PATTERNS.iter().map(|p| p.to_string()).collect();
        driver.set_blocked_urls(page, &patterns).await?;
        Ok(())
    }
}

/// Spoofs the fingerprinting surfaces automation is usually detected by.
#[derive(Debug)]
pub struct PrivacyGuard;

const PRIVACY_INIT_JS: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [] });
"#;

#[async_trait]
impl Plugin for PrivacyGuard {
    fn name(&self) -> &'static str {
        "privacy"
    }

    async fn initialize(&self, driver: &Arc<dyn Driver>, page: PageId) -> PilotResult<()> {
        driver.add_init_script(page, PRIVACY_INIT_JS).await?;
        Ok(())
    }
}

/// Scrolls through the page after navigation so lazy content loads.
#[derive(Debug)]
pub struct AutoScroll;

const AUTOSCROLL_JS: &str = r#"
(() => {
  let total = 0;
  const distance = 800;
  const timer = setInterval(() => {
    window.scrollBy(0, distance);
    total += distance;
    if (total >= document.body.scrollHeight) {
      clearInterval(timer);
      window.scrollTo(0, 0);
    }
  }, 250);
  return true;
})()
"#;

#[async_trait]
impl Plugin for AutoScroll {
    fn name(&self) -> &'static str {
        "autoscroll"
    }

    async fn after_navigation(
        &self,
        driver: &Arc<dyn Driver>,
        page: PageId,
        _url: &str,
    ) -> PilotResult<()> {
        driver.evaluate(page, AUTOSCROLL_JS).await?;
        Ok(())
    }
}

/// Build the enabled plugin set from the compiled-in registry.
pub fn build_plugins(settings: &PluginSettings) -> Result<Vec<Box<dyn Plugin>>, ConfigError> {
    settings
        .enabled
        .iter()
        .map(|name| -> Result<Box<dyn Plugin>, ConfigError> {
            match name.as_str() {
                "adblocker" => Ok(Box::new(AdBlocker)),
                "privacy" => Ok(Box::new(PrivacyGuard)),
                "autoscroll" => Ok(Box::new(AutoScroll)),
                other => Err(ConfigError::UnknownPlugin(other.to_string())),
            }
        })
        .collect()
}

/// Run the initialize hook for every plugin, logging failures without
/// aborting session startup.
pub async fn initialize_all(
    plugins: &[Box<dyn Plugin>],
    driver: &Arc<dyn Driver>,
    page: PageId,
) {
    for plugin in plugins {
        if let Err(err) = plugin.initialize(driver, page).await {
            warn!(target: "plugins", plugin = plugin.name(), ?err, "initialize failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_build() {
        let settings = PluginSettings {
            enabled: vec!["adblocker".into(), "privacy".into(), "autoscroll".into()],
        };
        let plugins = build_plugins(&settings).unwrap();
        assert_eq!(plugins.len(), 3);
        assert_eq!(plugins[0].name(), "adblocker");
    }

    #[test]
    fn unknown_name_is_a_config_error() {
        let settings = PluginSettings {
            enabled: vec!["payload-from-disk".into()],
        };
        let err = build_plugins(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlugin(name) if name == "payload-from-disk"));
    }

    #[test]
    fn empty_registry_is_fine() {
        let plugins = build_plugins(&PluginSettings::default()).unwrap();
        assert!(plugins.is_empty());
    }
}
