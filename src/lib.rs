//! Locator engine
//!
//! Facade over the element resolution crates: configuration loading, tracing
//! setup and a page session that keeps the active snapshot current.

pub mod config;
pub mod engine;
pub mod errors;
pub mod telemetry;

pub use config::{load_config, load_config_with_options, ConfigError, EngineConfig, LoadOptions};
pub use engine::{EngineMetrics, LocatorEngine, LocatorEngineBuilder};
pub use errors::EngineError;
pub use telemetry::init_tracing;

pub use action_locator::{
    ElementHandle, LiveDriver, LocatorError, ResolutionOutcome, ResolutionReport, ResolverConfig,
    SnapshotDriver, StopReason,
};
pub use embedding_cache::{CacheConfig, Embedder, HashingEmbedder};
pub use locator_core_types::{ContextId, ScopeId, ScopeKind, ScopeRef};
pub use perceiver_structural::{
    route_channel, CaptureOptions, CapturePort, RouteEvent, Snapshot, SnapshotChange,
    StaticCapturePort,
};
