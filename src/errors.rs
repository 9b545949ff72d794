use action_locator::LocatorError;
use perceiver_structural::PerceiverError;
use thiserror::Error;

use crate::config::ConfigError;

/// Facade error
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error(transparent)]
    Capture(#[from] PerceiverError),

    /// Nothing captured yet and no capture port to capture with
    #[error("no snapshot available: {0}")]
    NoSnapshot(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Config(err) => err.is_retryable(),
            EngineError::Locator(err) => err.is_retryable(),
            EngineError::Capture(err) => err.is_retryable(),
            EngineError::NoSnapshot(_) => false,
        }
    }
}
