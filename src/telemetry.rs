use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::TelemetryConfig;

static INIT: OnceCell<()> = OnceCell::new();

/// Installs the global subscriber once; later calls are no-ops.
///
/// `RUST_LOG` wins over `level`. Resolution events are emitted under the
/// `locator.events`, `perceiver.events` and `embedding.cache` targets.
pub fn init_tracing(level: &str, json: bool) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        let result = if json {
            registry
                .with(fmt::layer().json().with_target(true))
                .try_init()
        } else {
            registry.with(fmt::layer().with_target(true)).try_init()
        };
        if let Err(err) = result {
            tracing::debug!(?err, "global subscriber already installed");
        }
    });
}

pub fn init_from_config(config: &TelemetryConfig) {
    init_tracing(&config.level, config.json);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing("debug", false);
        init_tracing("trace", true);
        tracing::info!(target: "locator.events", "after init");
    }
}
