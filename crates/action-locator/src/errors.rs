//! Error types for the resolution engine

use embedding_cache::CacheError;
use locator_core_types::SoulError;
use thiserror::Error;

/// Locator error enumeration
#[derive(Debug, Error, Clone)]
pub enum LocatorError {
    /// Empty query or snapshot, or a malformed locator string. Always a
    /// caller bug, never a data condition.
    #[error("Invalid input: {0}")]
    InputInvalid(String),

    /// Zero matches
    #[error("Element not found: {0}")]
    NotFound(String),

    /// More than one match in scope
    #[error("Locator '{locator}' matched {count} elements")]
    Ambiguous { locator: String, count: usize },

    /// Driver call failed
    #[error("Driver unavailable: {0}")]
    DriverUnavailable(String),

    /// Driver call exceeded its per-attempt timeout
    #[error("Verification timeout: {0}")]
    Timeout(String),

    /// Caller cancelled the resolution
    #[error("Resolution cancelled: {0}")]
    Cancelled(String),

    /// Durable cache or promotion store I/O; recovered locally
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LocatorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LocatorError::Timeout(_) | LocatorError::DriverUnavailable(_)
        )
    }

    /// Get error severity (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            LocatorError::Internal(_) | LocatorError::InputInvalid(_) => 3,
            LocatorError::DriverUnavailable(_) | LocatorError::Timeout(_) => 2,
            LocatorError::NotFound(_) | LocatorError::Ambiguous { .. } => 1,
            LocatorError::Cancelled(_) | LocatorError::CacheUnavailable(_) => 0,
        }
    }
}

impl From<CacheError> for LocatorError {
    fn from(value: CacheError) -> Self {
        LocatorError::CacheUnavailable(value.to_string())
    }
}

impl From<LocatorError> for SoulError {
    fn from(value: LocatorError) -> Self {
        SoulError::new(value.to_string())
    }
}
