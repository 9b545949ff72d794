use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// How many frame/shadow levels below the main document are captured.
    pub max_scope_depth: usize,
    /// Attempts for the root capture before giving up.
    pub root_attempts: usize,
    pub retry_backoff_ms: u64,
    /// Keep descriptors the driver reported as not rendered.
    pub include_invisible: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_scope_depth: 3,
            root_attempts: 3,
            retry_backoff_ms: 50,
            include_invisible: true,
        }
    }
}
