//! # CastKit Common
//!
//! Shared error types and logging configuration for the CastKit offline
//! caching agent.
//!
//! ## Features
//!
//! - Unified, cloneable error type for cache and lifecycle operations
//! - Logging configuration and setup
//! - Result extension traits

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for CastKit.
///
/// Errors are cloneable so a single failure can be reported both to the
/// host runtime and into the lifecycle state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CastError {
    /// Network fetch rejected (offline, DNS failure, connection reset).
    #[error("Network error: {0}")]
    Network(String),

    /// Cache store operation failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Lifecycle state machine violation.
    #[error("State error: {0}")]
    State(String),

    /// Installation (provisioning) failed; the version must not go live.
    #[error("Install failed: {0}")]
    Install(String),

    /// Activation (reclamation) failed.
    #[error("Activation failed: {0}")]
    Activate(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CastError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    /// Create a state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Create an install error.
    pub fn install(message: impl Into<String>) -> Self {
        Self::Install(message.into())
    }

    /// Create an activation error.
    pub fn activate(message: impl Into<String>) -> Self {
        Self::Activate(message.into())
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            CastError::Network(_) => "network",
            CastError::Cache(_) => "cache",
            CastError::State(_) => "state",
            CastError::Install(_) => "install",
            CastError::Activate(_) => "activate",
            CastError::NotFound(_) => "not_found",
            CastError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for CastKit operations.
pub type Result<T> = std::result::Result<T, CastError>;

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| CastError::NotFound(resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(CastError::network("test").category(), "network");
        assert_eq!(CastError::install("test").category(), "install");
        assert_eq!(CastError::NotFound("x".into()).category(), "not_found");
    }

    #[test]
    fn test_error_display() {
        let err = CastError::install("asset /favicon.ico returned 503");
        assert_eq!(
            err.to_string(),
            "Install failed: asset /favicon.ico returned 503"
        );
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(42);
        assert_eq!(some.ok_or_not_found("test").unwrap(), 42);

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_not_found("test"),
            Err(CastError::NotFound(_))
        ));
    }
}
