//! LLM collaborator: completion client and prompt-keyed response cache.

pub mod cache;
pub mod client;

pub use cache::ResponseCache;
pub use client::LlmClient;
