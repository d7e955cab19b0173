//! Resolution orchestration: the ordered strategy chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cdp_driver::{Driver, PageId};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::ResolutionCache;
use crate::errors::ResolverError;
use crate::strategies::{
    attribute_wait_selector, best_candidate, category_selectors, reveal_script, HARVEST_JS,
};
use crate::types::{ElementDescriptor, Resolution, ResolutionStrategy, ScoreWeights};

/// Budget for the quick probes (direct selector, cached selector and
/// category templates) before falling through to the next strategy.
const PROBE_BUDGET: Duration = Duration::from_secs(2);

pub struct ElementResolver {
    driver: Arc<dyn Driver>,
    cache: Arc<ResolutionCache>,
    weights: ScoreWeights,
}

impl ElementResolver {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            cache: Arc::new(ResolutionCache::new()),
            weights: ScoreWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn cache(&self) -> Arc<ResolutionCache> {
        Arc::clone(&self.cache)
    }

    /// Inform the resolver that the executor navigated. Scoped cache
    /// state lives exactly one navigation.
    pub fn on_navigated(&self, url: &str) {
        self.cache.on_navigated(url);
    }

    /// Resolve a description to a selector addressing a visible element.
    ///
    /// Walks the strategy chain in order, returning on the first visible
    /// hit. The winner is recorded in the cache and revealed before the
    /// selector is handed back.
    pub async fn resolve(
        &self,
        page: PageId,
        description: &str,
        timeout: Duration,
    ) -> Result<Resolution, ResolverError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ResolverError::InvalidDescription(
                "empty description".into(),
            ));
        }

        let started = Instant::now();
        info!(target: "element-resolver", description, "resolving element");

        if let Some(resolution) = self.try_direct(page, description).await? {
            return self.commit(page, description, resolution).await;
        }

        if let Some(resolution) = self.try_cached(page, description).await? {
            return self.commit(page, description, resolution).await;
        }

        if let Some(resolution) = self.try_categories(page, description).await? {
            return self.commit(page, description, resolution).await;
        }

        if let Some(resolution) = self.try_scan(page, description).await? {
            return self.commit(page, description, resolution).await;
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        if let Some(resolution) = self.try_attribute_wait(page, description, remaining).await? {
            return self.commit(page, description, resolution).await;
        }

        Err(ResolverError::NotFound(description.to_string()))
    }

    /// Stage 1: the description may already be a working selector.
    async fn try_direct(
        &self,
        page: PageId,
        description: &str,
    ) -> Result<Option<Resolution>, ResolverError> {
        if self.driver.is_selector_visible(page, description).await? {
            debug!(target: "element-resolver", "description resolved as literal selector");
            return Ok(Some(Resolution::new(
                description,
                ResolutionStrategy::DirectSelector,
            )));
        }
        Ok(None)
    }

    /// Stage 2: re-probe the last selector that worked for this
    /// description on this URL. Stale entries are evicted so the scan
    /// gets a fresh look.
    async fn try_cached(
        &self,
        page: PageId,
        description: &str,
    ) -> Result<Option<Resolution>, ResolverError> {
        let Some(selector) = self.cache.lookup(description) else {
            return Ok(None);
        };

        let appeared = self
            .driver
            .wait_for_selector(page, &selector, PROBE_BUDGET)
            .await?;
        if appeared && self.driver.is_selector_visible(page, &selector).await? {
            debug!(target: "element-resolver", selector, "cache hit still valid");
            return Ok(Some(Resolution::new(
                selector,
                ResolutionStrategy::CachedSelector,
            )));
        }

        debug!(target: "element-resolver", selector, "evicting stale cache entry");
        self.cache.invalidate(description);
        Ok(None)
    }

    /// Stage 3: category templates for recognized keywords.
    async fn try_categories(
        &self,
        page: PageId,
        description: &str,
    ) -> Result<Option<Resolution>, ResolverError> {
        for selector in category_selectors(description) {
            let appeared = self
                .driver
                .wait_for_selector(page, &selector, PROBE_BUDGET)
                .await?;
            if appeared && self.driver.is_selector_visible(page, &selector).await? {
                debug!(target: "element-resolver", selector, "category heuristic hit");
                return Ok(Some(Resolution::new(
                    selector,
                    ResolutionStrategy::CategoryHeuristic,
                )));
            }
        }
        Ok(None)
    }

    /// Stage 4: score every element in the document.
    async fn try_scan(
        &self,
        page: PageId,
        description: &str,
    ) -> Result<Option<Resolution>, ResolverError> {
        let raw = self.driver.evaluate(page, HARVEST_JS).await?;
        let descriptors = parse_descriptors(raw)?;
        debug!(
            target: "element-resolver",
            harvested = descriptors.len(),
            "scan harvested descriptors"
        );

        let Some((winner, score)) = best_candidate(&descriptors, description, &self.weights) else {
            return Ok(None);
        };

        info!(
            target: "element-resolver",
            selector = %winner.generated_selector,
            score,
            "scored scan selected candidate"
        );
        Ok(Some(
            Resolution::new(
                winner.generated_selector.clone(),
                ResolutionStrategy::ScoredScan,
            )
            .with_score(score),
        ))
    }

    /// Stage 5: wait for a label-ish attribute match to appear, driven by
    /// the page's mutation watch rather than polling.
    async fn try_attribute_wait(
        &self,
        page: PageId,
        description: &str,
        remaining: Duration,
    ) -> Result<Option<Resolution>, ResolverError> {
        if remaining.is_zero() {
            return Ok(None);
        }

        let selector = attribute_wait_selector(description);
        let appeared = self
            .driver
            .wait_for_selector(page, &selector, remaining)
            .await?;
        if appeared {
            debug!(target: "element-resolver", selector, "late element caught by mutation watch");
            return Ok(Some(Resolution::new(
                selector,
                ResolutionStrategy::AttributeWait,
            )));
        }
        Ok(None)
    }

    /// Record the win and force the element interactable.
    async fn commit(
        &self,
        page: PageId,
        description: &str,
        resolution: Resolution,
    ) -> Result<Resolution, ResolverError> {
        self.cache.record(description, &resolution.selector);

        let literal = serde_json::to_string(&resolution.selector)
            .map_err(|err| ResolverError::MalformedScan(err.to_string()))?;
        if let Err(err) = self.driver.evaluate(page, &reveal_script(&literal)).await {
            // The element was just observed; a reveal failure is not
            // worth failing the resolution over.
            warn!(target: "element-resolver", ?err, "reveal script failed");
        }

        info!(
            target: "element-resolver",
            selector = %resolution.selector,
            strategy = resolution.strategy.name(),
            "element resolved"
        );
        Ok(resolution)
    }
}

fn parse_descriptors(raw: Value) -> Result<Vec<ElementDescriptor>, ResolverError> {
    if raw.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(raw).map_err(|err| ResolverError::MalformedScan(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cdp_driver::{CookieParam, DriverError, PageEvent};
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    /// Driver stub: a set of "visible" selectors plus a canned harvest.
    #[derive(Default)]
    struct MockDriver {
        visible: Mutex<HashSet<String>>,
        harvest: Mutex<Value>,
        waited: Mutex<Vec<String>>,
    }

    impl MockDriver {
        fn show(&self, selector: &str) {
            self.visible.lock().unwrap().insert(selector.to_string());
        }

        fn hide(&self, selector: &str) {
            self.visible.lock().unwrap().remove(selector);
        }

        fn set_harvest(&self, value: Value) {
            *self.harvest.lock().unwrap() = value;
        }
    }

    #[async_trait]
    impl Driver for MockDriver {
        async fn create_page(&self, _url: &str) -> Result<PageId, DriverError> {
            Ok(PageId::new())
        }

        async fn navigate(
            &self,
            _page: PageId,
            _url: &str,
            _deadline: Duration,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn evaluate(&self, _page: PageId, expression: &str) -> Result<Value, DriverError> {
            if expression.contains("querySelectorAll") {
                return Ok(self.harvest.lock().unwrap().clone());
            }
            Ok(Value::Bool(true))
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
            Ok(self.visible.lock().unwrap().contains(selector))
        }

        async fn wait_for_selector(
            &self,
            _page: PageId,
            selector: &str,
            _deadline: Duration,
        ) -> Result<bool, DriverError> {
            self.waited.lock().unwrap().push(selector.to_string());
            Ok(self.visible.lock().unwrap().contains(selector))
        }

        async fn click(
            &self,
            _page: PageId,
            _selector: &str,
            _deadline: Duration,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn type_text(
            &self,
            _page: PageId,
            _selector: &str,
            _text: &str,
            _keystroke_delay: Duration,
            _deadline: Duration,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn press_key(&self, _page: PageId, _key: &str) -> Result<(), DriverError> {
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

        async fn set_user_agent(&self, _page: PageId, _ua: &str) -> Result<(), DriverError> {
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
            Ok(String::new())
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

    fn harvest_entry(selector: &str, aria_label: &str) -> Value {
        json!({
            "tag": "button",
            "role": "",
            "text": "",
            "attributes": { "aria-label": aria_label },
            "isVisible": true,
            "boundingRect": { "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0 },
            "generatedSelector": selector,
        })
    }

    #[tokio::test]
    async fn literal_selector_short_circuits() {
        let driver = Arc::new(MockDriver::default());
        driver.show("#login");
        let resolver = ElementResolver::new(driver);

        let resolution = resolver
            .resolve(PageId::new(), "#login", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::DirectSelector);
        assert_eq!(resolution.selector, "#login");
    }

    #[tokio::test]
    async fn stale_cache_entry_is_bypassed_and_evicted() {
        let driver = Arc::new(MockDriver::default());
        let resolver = ElementResolver::new(driver.clone());
        resolver.on_navigated("https://example.com");

        // First resolution lands in the cache via the scored scan.
        driver.set_harvest(json!([harvest_entry("button#old", "subscribe")]));
        let first = resolver
            .resolve(PageId::new(), "subscribe", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first.selector, "button#old");

        // The DOM mutated: the old selector no longer matches anything
        // visible, a new element carries the label.
        driver.hide("button#old");
        driver.set_harvest(json!([harvest_entry("button#new", "subscribe")]));

        let second = resolver
            .resolve(PageId::new(), "subscribe", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(second.selector, "button#new");
        assert_eq!(second.strategy, ResolutionStrategy::ScoredScan);
        assert_eq!(
            resolver.cache().lookup("subscribe").as_deref(),
            Some("button#new")
        );
    }

    #[tokio::test]
    async fn search_description_hits_category_template() {
        let driver = Arc::new(MockDriver::default());
        driver.show("input[name=\"search_query\"]");
        let resolver = ElementResolver::new(driver);

        let resolution = resolver
            .resolve(PageId::new(), "search box", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::CategoryHeuristic);
        assert_eq!(resolution.selector, "input[name=\"search_query\"]");
    }

    #[tokio::test]
    async fn low_scores_fall_through_to_not_found() {
        let driver = Arc::new(MockDriver::default());
        driver.set_harvest(json!([{
            "tag": "div",
            "role": "",
            "text": "unrelated",
            "attributes": {},
            "isVisible": true,
            "boundingRect": { "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0 },
            "generatedSelector": "div#noise",
        }]));
        let resolver = ElementResolver::new(driver);

        let err = resolver
            .resolve(PageId::new(), "subscribe", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::NotFound(_)));
    }

    #[tokio::test]
    async fn late_element_is_caught_by_attribute_wait() {
        let driver = Arc::new(MockDriver::default());
        driver.set_harvest(json!([]));
        driver.show(&attribute_wait_selector("upload"));
        let resolver = ElementResolver::new(driver);

        let resolution = resolver
            .resolve(PageId::new(), "upload", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::AttributeWait);
    }

    #[tokio::test]
    async fn empty_description_is_rejected() {
        let driver = Arc::new(MockDriver::default());
        let resolver = ElementResolver::new(driver);
        let err = resolver
            .resolve(PageId::new(), "  ", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::InvalidDescription(_)));
    }
}
