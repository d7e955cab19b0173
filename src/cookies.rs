//! Per-domain cookie persistence.
//!
//! One JSON file per domain, each holding the cookie set and the time it
//! was saved. Records older than the TTL are treated as absent on load
//! and deleted from disk. Files are independent per domain, so loads and
//! saves can interleave with navigation without locking.

use std::path::{Path, PathBuf};

use cdp_driver::CookieParam;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("invalid url '{0}'")]
    InvalidUrl(String),

    #[error("cookie io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cookie record corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Persisted per-domain record.
#[derive(Debug, Serialize, Deserialize)]
pub struct CookieRecord {
    pub saved_at: DateTime<Utc>,
    pub cookies: Vec<CookieParam>,
}

pub struct CookieStore {
    dir: PathBuf,
    max_age: Duration,
}

impl CookieStore {
    pub fn new(dir: impl Into<PathBuf>, max_age_days: i64) -> Self {
        Self {
            dir: dir.into(),
            max_age: Duration::days(max_age_days),
        }
    }

    fn record_path(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("{domain}.json"))
    }

    /// Load cookies for the URL's domain. Expired or missing records
    /// yield the domain's consent seeds (possibly empty) instead.
    pub fn load_for(&self, url: &str) -> Result<Vec<CookieParam>, CookieError> {
        let domain = domain_of(url)?;
        let path = self.record_path(&domain);

        if !path.exists() {
            let seeds = consent_seeds(&domain);
            if !seeds.is_empty() {
                debug!(domain, "no stored cookies; seeding consent defaults");
            }
            return Ok(seeds);
        }

        let record: CookieRecord = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        if Utc::now() - record.saved_at > self.max_age {
            info!(domain, "stored cookies expired; removing record");
            let _ = std::fs::remove_file(&path);
            return Ok(consent_seeds(&domain));
        }

        debug!(domain, count = record.cookies.len(), "loaded cookies");
        Ok(record.cookies)
    }

    /// Persist cookies for the URL's domain, stamped with the current
    /// time. Consent seeds for known domains are folded in.
    pub fn save_for(&self, url: &str, cookies: Vec<CookieParam>) -> Result<(), CookieError> {
        let domain = domain_of(url)?;
        std::fs::create_dir_all(&self.dir)?;

        let mut cookies = cookies;
        for seed in consent_seeds(&domain) {
            if !cookies.iter().any(|c| c.name == seed.name) {
                cookies.push(seed);
            }
        }

        let record = CookieRecord {
            saved_at: Utc::now(),
            cookies,
        };
        let path = self.record_path(&domain);
        std::fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        debug!(domain, count = record.cookies.len(), "saved cookies");
        Ok(())
    }

    /// Remove every record older than the TTL.
    pub fn clear_expired(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            match read_record(&path) {
                Ok(record) if Utc::now() - record.saved_at > self.max_age => {
                    info!(path = %path.display(), "clearing expired cookie record");
                    let _ = std::fs::remove_file(&path);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(path = %path.display(), %err, "unreadable cookie record, removing");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
    }

    /// Remove every stored record.
    pub fn clear_all(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let _ = std::fs::remove_file(entry.path());
        }
        info!("cleared all stored cookies");
    }
}

fn read_record(path: &Path) -> Result<CookieRecord, CookieError> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

/// Extract the host portion of a URL for use as the record key.
pub fn domain_of(url: &str) -> Result<String, CookieError> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .ok_or_else(|| CookieError::InvalidUrl(url.to_string()))
}

/// Consent cookies pre-seeded for domains with hard consent walls.
fn consent_seeds(domain: &str) -> Vec<CookieParam> {
    if !domain.ends_with("ft.com") {
        return Vec::new();
    }

    ["FTConsent", "cookieConsent", "accept_cookies"]
        .iter()
        .map(|name| CookieParam {
            name: name.to_string(),
            value: "true".into(),
            domain: Some(".ft.com".into()),
            path: Some("/".into()),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cookie(name: &str) -> CookieParam {
        CookieParam {
            name: name.into(),
            value: "v".into(),
            domain: Some("example.com".into()),
            ..Default::default()
        }
    }

    #[test]
    fn round_trips_cookies_per_domain() {
        let dir = TempDir::new().unwrap();
        let store = CookieStore::new(dir.path(), 30);

        store
            .save_for("https://example.com/page", vec![cookie("sid")])
            .unwrap();
        let loaded = store.load_for("https://example.com/other").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "sid");

        // A different domain sees nothing.
        assert!(store.load_for("https://other.example").unwrap().is_empty());
    }

    #[test]
    fn expired_record_is_absent_and_removed() {
        let dir = TempDir::new().unwrap();
        let store = CookieStore::new(dir.path(), 30);

        let stale = CookieRecord {
            saved_at: Utc::now() - Duration::days(31),
            cookies: vec![cookie("sid")],
        };
        let path = dir.path().join("example.com.json");
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let loaded = store.load_for("https://example.com").unwrap();
        assert!(loaded.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn clear_expired_keeps_fresh_records() {
        let dir = TempDir::new().unwrap();
        let store = CookieStore::new(dir.path(), 30);

        store
            .save_for("https://fresh.example", vec![cookie("a")])
            .unwrap();
        let stale = CookieRecord {
            saved_at: Utc::now() - Duration::days(90),
            cookies: vec![cookie("b")],
        };
        std::fs::write(
            dir.path().join("stale.example.json"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        store.clear_expired();
        assert!(dir.path().join("fresh.example.json").exists());
        assert!(!dir.path().join("stale.example.json").exists());
    }

    #[test]
    fn consent_seeds_for_known_domain() {
        let dir = TempDir::new().unwrap();
        let store = CookieStore::new(dir.path(), 30);

        let loaded = store.load_for("https://www.ft.com/content/x").unwrap();
        assert!(loaded.iter().any(|c| c.name == "FTConsent"));
    }
}
