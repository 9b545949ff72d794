use locator_core_types::SoulError;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum CacheError {
    #[error("durable tier io failure: {0}")]
    Io(String),
    #[error("durable record corrupt: {0}")]
    Corrupt(String),
    #[error("embedding failed: {0}")]
    EmbedFailed(String),
    #[error("durable tier disabled")]
    Disabled,
}

impl CacheError {
    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io(err.to_string())
    }

    /// I/O failures take the durable tier offline; a corrupt record only
    /// invalidates itself.
    pub fn degrades_tier(&self) -> bool {
        matches!(self, CacheError::Io(_))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(value: std::io::Error) -> Self {
        CacheError::io(value)
    }
}

impl From<CacheError> for SoulError {
    fn from(value: CacheError) -> Self {
        SoulError::new(value.to_string())
    }
}
