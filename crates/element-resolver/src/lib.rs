//! Multi-strategy element resolution.
//!
//! Maps a semantic description ("search box", "accept button", or a
//! literal selector) to a concrete, currently-visible DOM node on a live
//! page. Strategies run in a fixed fallback order, short-circuiting on
//! the first visible hit:
//! 1. direct selector probe
//! 2. cached selector re-probe (per-URL cache)
//! 3. category heuristics (search/button/input/link templates)
//! 4. scored full-DOM scan with confidence threshold
//! 5. mutation-watch attribute wait
//!
//! Successful resolutions are cached per page URL and the winning element
//! is revealed (ancestors un-hidden, scrolled into view) before handing
//! the selector back to the caller.

pub mod cache;
pub mod errors;
pub mod resolver;
pub mod strategies;
pub mod types;

pub use cache::ResolutionCache;
pub use errors::ResolverError;
pub use resolver::ElementResolver;
pub use strategies::{category_selectors, score_descriptor};
pub use types::{
    BoundingRect, ElementDescriptor, Resolution, ResolutionStrategy, ScoreWeights,
};
