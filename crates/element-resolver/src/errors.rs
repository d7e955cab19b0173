//! Error types for element resolution

use cdp_driver::DriverError;
use thiserror::Error;

/// Resolver error enumeration
#[derive(Debug, Error)]
pub enum ResolverError {
    /// No strategy produced a visible element for the description.
    #[error("element not found: {0}")]
    NotFound(String),

    /// Empty or unusable description.
    #[error("invalid description: {0}")]
    InvalidDescription(String),

    /// The underlying driver failed while probing the page.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// The harvest script returned something other than descriptors.
    #[error("malformed page scan: {0}")]
    MalformedScan(String),
}

impl ResolverError {
    /// Whether a retry at a later time could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolverError::NotFound(_) => true,
            ResolverError::Driver(err) => err.is_retryable(),
            _ => false,
        }
    }
}
