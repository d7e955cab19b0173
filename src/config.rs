//! Configuration management.
//!
//! Settings load from a YAML file (all sections optional, everything has
//! a default) with a small set of `WEBPILOT_*` environment overrides on
//! top. Per-domain overrides (headers, cookies, viewport, user agent)
//! are applied by the session right before navigating to that domain.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cdp_driver::CookieParam;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("unknown plugin '{0}' in plugins.enabled")]
    UnknownPlugin(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Per-operation default deadline.
    pub default_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    pub user_agent: Option<String>,
    pub user_data_dir: PathBuf,
    pub executable: Option<PathBuf>,
    /// URL patterns blocked on every page (ads, trackers).
    pub blocked_url_patterns: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            default_timeout_ms: 30_000,
            navigation_timeout_ms: 60_000,
            user_agent: None,
            user_data_dir: PathBuf::from("./.webpilot-profile"),
            executable: None,
            blocked_url_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-3.5-sonnet:beta".into(),
            temperature: 0.7,
            max_tokens: 2000,
            base_url: "https://openrouter.ai/api/v1".into(),
            api_key_env: "OPENROUTER_API_KEY".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub dir: PathBuf,
    pub max_age_days: i64,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache/cookies"),
            max_age_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub dir: PathBuf,
    pub ttl_seconds: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".cache/llm"),
            ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub check_interval_secs: u64,
    /// Probe attempts per cycle before the session is declared unhealthy.
    pub probe_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            probe_attempts: 3,
            backoff_base_secs: 4,
            backoff_max_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    pub element_timeout_ms: u64,
    pub keystroke_delay_ms: u64,
    /// Pause after click/type for the page to settle.
    pub settle_delay_ms: u64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            element_timeout_ms: 10_000,
            keystroke_delay_ms: 50,
            settle_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Names from the static plugin registry to activate.
    pub enabled: Vec<String>,
}

/// Per-domain overrides applied right before navigating to the domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainOverrides {
    pub headers: HashMap<String, String>,
    pub cookies: Vec<CookieParam>,
    pub viewport: Option<Viewport>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Main application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub browser: BrowserSettings,
    pub llm: LlmSettings,
    pub cookies: CookieSettings,
    pub cache: CacheSettings,
    pub health: HealthSettings,
    pub resolver: ResolverSettings,
    pub plugins: PluginSettings,
    /// Keyed by domain (`www.ft.com`), matched by suffix.
    pub domains: HashMap<String, DomainOverrides>,
}

impl Settings {
    /// Load settings from a YAML file, falling back to defaults when the
    /// file is absent, then apply environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("config/webpilot.yaml"));

        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            if config_path.is_some() {
                warn!(path = %path.display(), "config file not found, using defaults");
            }
            Settings::default()
        };

        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("WEBPILOT_HEADLESS") {
            let lower = value.to_ascii_lowercase();
            self.browser.headless = !matches!(lower.as_str(), "0" | "false" | "no" | "off");
        }
        if let Ok(model) = std::env::var("WEBPILOT_MODEL") {
            if !model.trim().is_empty() {
                self.llm.model = model;
            }
        }
        if let Ok(path) = std::env::var("WEBPILOT_CHROME") {
            if !path.trim().is_empty() {
                self.browser.executable = Some(PathBuf::from(path));
            }
        }
    }

    /// Overrides for a host, matched by domain suffix so `www.ft.com`
    /// picks up a `ft.com` entry.
    pub fn domain_overrides(&self, host: &str) -> Option<&DomainOverrides> {
        self.domains.iter().find_map(|(domain, overrides)| {
            let matches = host == domain
                || host
                    .strip_suffix(domain)
                    .map(|prefix| prefix.ends_with('.'))
                    .unwrap_or(false);
            matches.then_some(overrides)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert!(settings.browser.headless);
        assert_eq!(settings.browser.viewport_width, 1280);
        assert_eq!(settings.health.check_interval_secs, 60);
        assert_eq!(settings.cookies.max_age_days, 30);
        assert_eq!(settings.resolver.settle_delay_ms, 500);
    }

    #[test]
    fn yaml_sections_are_all_optional() {
        let settings: Settings = serde_yaml::from_str("llm:\n  model: test-model\n").unwrap();
        assert_eq!(settings.llm.model, "test-model");
        assert_eq!(settings.browser.viewport_height, 720);
    }

    #[test]
    fn domain_overrides_match_by_suffix() {
        let yaml = r#"
domains:
  ft.com:
    headers:
      Referer: "https://www.google.com"
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert!(settings.domain_overrides("www.ft.com").is_some());
        assert!(settings.domain_overrides("ft.com").is_some());
        assert!(settings.domain_overrides("draft.company").is_none());
        assert!(settings.domain_overrides("example.org").is_none());
    }
}
