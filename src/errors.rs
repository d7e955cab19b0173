//! Error taxonomy for the automation core.
//!
//! Failure scope determines the variant: plan-local failures abort the
//! current command and are reported back as a readable error string;
//! session-level failures trigger a rebuild; only a failed rebuild is
//! fatal to the process.

use cdp_driver::DriverError;
use element_resolver::ResolverError;
use thiserror::Error;

use crate::plan::PlanError;

/// Unified error type for command execution.
#[derive(Debug, Error)]
pub enum PilotError {
    /// Malformed or uninterpretable LLM output; the plan never starts.
    #[error(transparent)]
    PlanValidation(#[from] PlanError),

    /// A required target could not be resolved; aborts the current plan.
    #[error("could not find element: {0}")]
    ElementNotFound(String),

    /// The page failed to load; aborts the current plan.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Detected by the health monitor; a session rebuild is underway.
    #[error("browser session unhealthy: {0}")]
    SessionUnhealthy(String),

    /// Session rebuild itself failed. Surfaced to the top-level caller.
    #[error("fatal session failure: {0}")]
    SessionFatal(String),

    /// LLM collaborator failure (network, auth, empty reply).
    #[error("llm request failed: {0}")]
    Llm(String),

    /// Cookie persistence failure.
    #[error("cookie store error: {0}")]
    CookieStore(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Browser-control failure outside the categories above.
    #[error("browser error: {0}")]
    Driver(#[from] DriverError),
}

impl PilotError {
    /// Fatal errors end the interactive loop; everything else is
    /// reported and the loop keeps accepting commands.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PilotError::SessionFatal(_))
    }
}

impl From<ResolverError> for PilotError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::NotFound(desc) => PilotError::ElementNotFound(desc),
            ResolverError::InvalidDescription(desc) => PilotError::ElementNotFound(desc),
            ResolverError::Driver(err) => PilotError::Driver(err),
            ResolverError::MalformedScan(msg) => {
                PilotError::Driver(DriverError::Protocol(msg))
            }
        }
    }
}

/// Result alias used across the core.
pub type PilotResult<T> = Result<T, PilotError>;
