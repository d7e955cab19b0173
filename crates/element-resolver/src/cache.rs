//! Per-URL resolution cache.
//!
//! Remembers the last selector that successfully resolved each
//! description, scoped to the current page URL. Navigating to a
//! different URL invalidates the whole cache; a stale entry that stops
//! matching a visible element is evicted individually by the resolver.

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Default)]
pub struct ResolutionCache {
    current_url: Mutex<String>,
    entries: DashMap<String, String>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inform the cache of a navigation. A different URL clears all
    /// entries; re-navigation to the same URL keeps them.
    pub fn on_navigated(&self, url: &str) {
        let mut current = self.current_url.lock();
        if *current != url {
            *current = url.to_string();
            self.entries.clear();
        }
    }

    pub fn record(&self, description: &str, selector: &str) {
        self.entries
            .insert(description.to_string(), selector.to_string());
    }

    pub fn lookup(&self, description: &str) -> Option<String> {
        self.entries.get(description).map(|e| e.value().clone())
    }

    /// Drop a single stale entry.
    pub fn invalidate(&self, description: &str) {
        self.entries.remove(description);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_looks_up() {
        let cache = ResolutionCache::new();
        cache.on_navigated("https://example.com");
        cache.record("search box", "input[name=q]");
        assert_eq!(cache.lookup("search box").as_deref(), Some("input[name=q]"));
    }

    #[test]
    fn navigation_to_different_url_clears_everything() {
        let cache = ResolutionCache::new();
        cache.on_navigated("https://example.com");
        cache.record("search box", "input[name=q]");
        cache.record("login link", "a#login");

        cache.on_navigated("https://other.example");
        assert!(cache.is_empty());
    }

    #[test]
    fn same_url_navigation_keeps_entries() {
        let cache = ResolutionCache::new();
        cache.on_navigated("https://example.com");
        cache.record("search box", "input[name=q]");

        cache.on_navigated("https://example.com");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_drops_single_entry() {
        let cache = ResolutionCache::new();
        cache.on_navigated("https://example.com");
        cache.record("search box", "input[name=q]");
        cache.record("login link", "a#login");

        cache.invalidate("search box");
        assert!(cache.lookup("search box").is_none());
        assert!(cache.lookup("login link").is_some());
    }
}
