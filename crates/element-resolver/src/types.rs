//! Core types for the resolution system

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Attributes considered by the scored scan, in match-priority order.
pub const SCORED_ATTRIBUTES: &[&str] = &["id", "name", "placeholder", "aria-label", "title", "alt"];

/// Tags that earn the interactive bonus.
pub const INTERACTIVE_TAGS: &[&str] = &["button", "a", "input", "textarea", "select"];

/// Resolution strategy enumeration, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    /// The description already was a working selector.
    DirectSelector,

    /// A previously successful selector for this description on this URL.
    CachedSelector,

    /// Category template (search/button/input/link keyword).
    CategoryHeuristic,

    /// Max-scoring element from the full-DOM scan.
    ScoredScan,

    /// Element appeared later, caught by the mutation watch.
    AttributeWait,
}

impl ResolutionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ResolutionStrategy::DirectSelector => "direct-selector",
            ResolutionStrategy::CachedSelector => "cached-selector",
            ResolutionStrategy::CategoryHeuristic => "category-heuristic",
            ResolutionStrategy::ScoredScan => "scored-scan",
            ResolutionStrategy::AttributeWait => "attribute-wait",
        }
    }
}

/// Transient snapshot of a DOM node produced by the harvest script.
///
/// Rebuilt on every scan; never persisted across navigations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementDescriptor {
    pub tag: String,
    pub role: String,
    pub text: String,
    pub attributes: HashMap<String, String>,
    pub is_visible: bool,
    pub bounding_rect: BoundingRect,
    pub generated_selector: String,
}

/// Viewport-relative bounding rectangle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BoundingRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Weights for the scored full-DOM scan.
///
/// Heuristic constants inherited from the source system; a tunable
/// starting point rather than a contract.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub exact_text: f64,
    pub partial_text: f64,
    pub exact_attribute: f64,
    pub partial_attribute: f64,
    pub tag_mention: f64,
    pub interactive_bonus: f64,
    pub visibility_bonus: f64,
    /// Best candidate must score strictly above this to be accepted.
    pub acceptance_threshold: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            exact_text: 1.0,
            partial_text: 0.5,
            exact_attribute: 0.8,
            partial_attribute: 0.3,
            tag_mention: 0.2,
            interactive_bonus: 0.1,
            visibility_bonus: 0.3,
            acceptance_threshold: 0.5,
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Selector that currently addresses the element.
    pub selector: String,

    /// Strategy that produced the hit.
    pub strategy: ResolutionStrategy,

    /// Confidence score, present only for the scored scan.
    pub score: Option<f64>,
}

impl Resolution {
    pub fn new(selector: impl Into<String>, strategy: ResolutionStrategy) -> Self {
        Self {
            selector: selector.into(),
            strategy,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}
