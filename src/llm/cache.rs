//! Disk cache for LLM responses.
//!
//! Entries are keyed by the sha256 of the full prompt and carry
//! `{ timestamp, response }`. Entries older than the TTL are ignored on
//! lookup and removed from disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    timestamp: DateTime<Utc>,
    response: String,
}

pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, ttl_seconds: i64) -> Self {
        Self {
            dir: dir.into(),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Content hash of the prompt, used as the file name.
    pub fn key_for(prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Returns the cached response if present and fresh. Stale entries
    /// are deleted on the way out.
    pub fn lookup(&self, prompt: &str) -> Option<String> {
        let path = self.entry_path(&Self::key_for(prompt));
        let entry = read_entry(&path)?;

        if Utc::now() - entry.timestamp > self.ttl {
            debug!(path = %path.display(), "cache entry expired");
            let _ = std::fs::remove_file(&path);
            return None;
        }

        debug!(path = %path.display(), "llm cache hit");
        Some(entry.response)
    }

    pub fn store(&self, prompt: &str, response: &str) {
        if let Err(err) = std::fs::create_dir_all(&self.dir) {
            warn!(?err, "failed to create llm cache dir");
            return;
        }

        let entry = CacheEntry {
            timestamp: Utc::now(),
            response: response.to_string(),
        };
        let path = self.entry_path(&Self::key_for(prompt));
        match serde_json::to_string(&entry) {
            Ok(serialized) => {
                if let Err(err) = std::fs::write(&path, serialized) {
                    warn!(?err, "failed to write llm cache entry");
                }
            }
            Err(err) => warn!(?err, "failed to serialize llm cache entry"),
        }
    }

    /// Drop every entry past its TTL.
    pub fn purge_expired(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for dir_entry in entries.flatten() {
            let path = dir_entry.path();
            match read_entry(&path) {
                Some(entry) if Utc::now() - entry.timestamp > self.ttl => {
                    let _ = std::fs::remove_file(&path);
                }
                Some(_) => {}
                None => {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
    }
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stores_and_looks_up_by_prompt_hash() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 3600);

        cache.store("plan: search youtube", "{\"url\": \"https://youtube.com\"}");
        assert_eq!(
            cache.lookup("plan: search youtube").as_deref(),
            Some("{\"url\": \"https://youtube.com\"}")
        );
        assert!(cache.lookup("different prompt").is_none());
    }

    #[test]
    fn expired_entries_are_ignored_and_removed() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 3600);

        let stale = CacheEntry {
            timestamp: Utc::now() - Duration::seconds(7200),
            response: "old".into(),
        };
        let path = dir.path().join(format!(
            "{}.json",
            ResponseCache::key_for("old prompt")
        ));
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        assert!(cache.lookup("old prompt").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn key_is_stable_and_prompt_sensitive() {
        let a = ResponseCache::key_for("prompt a");
        assert_eq!(a, ResponseCache::key_for("prompt a"));
        assert_ne!(a, ResponseCache::key_for("prompt b"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 3600);

        cache.store("fresh", "f");
        let stale = CacheEntry {
            timestamp: Utc::now() - Duration::seconds(7200),
            response: "s".into(),
        };
        let stale_path = dir
            .path()
            .join(format!("{}.json", ResponseCache::key_for("stale")));
        std::fs::write(&stale_path, serde_json::to_string(&stale).unwrap()).unwrap();

        cache.purge_expired();
        assert!(cache.lookup("fresh").is_some());
        assert!(!stale_path.exists());
    }
}
