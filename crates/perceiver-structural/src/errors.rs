use locator_core_types::SoulError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PerceiverError {
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("scope {scope} unavailable: {reason}")]
    ScopeUnavailable { scope: String, reason: String },
    #[error("invalid tree: {0}")]
    InvalidTree(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PerceiverError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn scope_unavailable(scope: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ScopeUnavailable {
            scope: scope.into(),
            reason: reason.into(),
        }
    }

    /// Capture failures are transient (navigation in flight, detached frame).
    pub fn is_retryable(&self) -> bool {
        matches!(self, PerceiverError::CaptureFailed(_))
    }
}

impl From<PerceiverError> for SoulError {
    fn from(value: PerceiverError) -> Self {
        SoulError::new(value.to_string())
    }
}
