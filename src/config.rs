//! Engine configuration
//!
//! Layers, later wins: built-in defaults, an optional YAML file, `LOCATOR__A__B`
//! environment variables, then a JSON document in `LOCATOR_OVERRIDE_JSON`.

use std::env;
use std::fs;
use std::path::Path;

use action_locator::{PromotionConfig, RankOptions, ResolverConfig};
use embedding_cache::CacheConfig;
use perceiver_structural::CaptureOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

const ENV_PREFIX: &str = "LOCATOR__";
const ENV_JSON: &str = "LOCATOR_OVERRIDE_JSON";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("unsupported config path: {0}")]
    UnsupportedPath(String),
    #[error("invalid value at {path}: {reason}")]
    InvalidValue { path: String, reason: String },
}

impl ConfigError {
    /// Only a file that could not be read may succeed on a second try.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConfigError::Io(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub resolver: ResolverConfig,
    pub cache: CacheConfig,
    pub capture: CaptureOptions,
    pub promotion: PromotionConfig,
    /// Dimension of the built-in hashing embedder
    pub embedding_dimension: usize,
    pub telemetry: TelemetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            cache: CacheConfig::default(),
            capture: CaptureOptions::default(),
            promotion: PromotionConfig::default(),
            embedding_dimension: 256,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Rejects values no resolution could run with. An out-of-range top-k is
    /// clamped instead.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let clamped = self.resolver.rank.clamped_top_k();
        if clamped != self.resolver.rank.top_k {
            warn!(
                requested = self.resolver.rank.top_k,
                clamped,
                min = RankOptions::MIN_TOP_K,
                max = RankOptions::MAX_TOP_K,
                "resolver.rank.top_k out of range; clamped"
            );
            self.resolver.rank.top_k = clamped;
        }
        self.resolver
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid(
                "cache.capacity must be at least 1".to_string(),
            ));
        }
        if !self.promotion.is_valid() {
            return Err(ConfigError::Invalid(
                "promotion step must be non-negative and floor <= ceiling".to_string(),
            ));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::Invalid(
                "embedding_dimension must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoadOptions {
    pub path: Option<std::path::PathBuf>,
    pub include_env: bool,
}

impl LoadOptions {
    pub fn with_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            include_env: true,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let options = LoadOptions {
        path: path.map(Path::to_path_buf),
        include_env: true,
    };
    load_config_with_options(&options)
}

pub fn load_config_with_options(options: &LoadOptions) -> Result<EngineConfig, ConfigError> {
    let mut tree = serde_json::to_value(EngineConfig::default())
        .map_err(|err| ConfigError::Invalid(err.to_string()))?;

    if let Some(path) = &options.path {
        if path.exists() {
            apply_overlays(&mut tree, overlays_from_file(path)?)?;
        } else {
            debug!(path = %path.display(), "config file not found; using defaults");
        }
    }

    if options.include_env {
        apply_overlays(&mut tree, overlays_from_env()?)?;
    }

    let mut config: EngineConfig =
        serde_json::from_value(tree).map_err(|err| ConfigError::Invalid(err.to_string()))?;
    config.validate()?;
    Ok(config)
}

struct Overlay {
    path: String,
    value: Value,
}

fn apply_overlays(tree: &mut Value, overlays: Vec<Overlay>) -> Result<(), ConfigError> {
    for overlay in overlays {
        set_path(tree, &overlay.path, overlay.value)?;
    }
    Ok(())
}

/// Writes `value` at a dotted path. Every segment must already exist in the
/// defaults tree, so misspelled keys fail loudly instead of being dropped.
fn set_path(tree: &mut Value, path: &str, value: Value) -> Result<(), ConfigError> {
    let mut cursor = tree;
    let segments: Vec<&str> = path.split('.').collect();
    for (index, segment) in segments.iter().enumerate() {
        let map = cursor
            .as_object_mut()
            .ok_or_else(|| ConfigError::UnsupportedPath(path.to_string()))?;
        let slot = map
            .get_mut(*segment)
            .ok_or_else(|| ConfigError::UnsupportedPath(path.to_string()))?;
        if index + 1 == segments.len() {
            if slot.is_object() && !value.is_object() {
                return Err(ConfigError::InvalidValue {
                    path: path.to_string(),
                    reason: "expected a table".to_string(),
                });
            }
            *slot = value;
            return Ok(());
        }
        cursor = slot;
    }
    Err(ConfigError::UnsupportedPath(path.to_string()))
}

fn overlays_from_file(path: &Path) -> Result<Vec<Overlay>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|err| ConfigError::Io(format!("{}", err)))?;
    let yaml_value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|err| ConfigError::Invalid(format!("{}", err)))?;
    let json_value =
        serde_json::to_value(yaml_value).map_err(|err| ConfigError::Invalid(format!("{}", err)))?;
    if json_value.is_null() {
        return Ok(Vec::new());
    }
    if !json_value.is_object() {
        return Err(ConfigError::Invalid(format!(
            "{}: top level must be a mapping",
            path.display()
        )));
    }
    Ok(flatten_value(json_value, None))
}

fn overlays_from_env() -> Result<Vec<Overlay>, ConfigError> {
    let mut overlays = Vec::new();
    let mut vars: Vec<(String, String)> = env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect();
    vars.sort();
    for (key, raw) in vars {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(".");
        if path.is_empty() {
            continue;
        }
        overlays.push(Overlay {
            path,
            value: parse_env_value(&raw),
        });
    }

    if let Ok(raw_json) = env::var(ENV_JSON) {
        if !raw_json.trim().is_empty() {
            let json_value: Value = serde_json::from_str(&raw_json)
                .map_err(|err| ConfigError::Invalid(format!("{}: {}", ENV_JSON, err)))?;
            overlays.extend(flatten_value(json_value, None));
        }
    }

    Ok(overlays)
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    if let Ok(boolean) = raw.parse::<bool>() {
        return Value::Bool(boolean);
    }
    Value::String(raw.to_string())
}

fn flatten_value(value: Value, prefix: Option<String>) -> Vec<Overlay> {
    match value {
        Value::Object(map) => flatten_map(map, prefix),
        other => match prefix {
            Some(path) => vec![Overlay { path, value: other }],
            None => Vec::new(),
        },
    }
}

fn flatten_map(map: Map<String, Value>, prefix: Option<String>) -> Vec<Overlay> {
    let mut result = Vec::new();
    for (key, value) in map {
        let key_segment = key.trim().to_ascii_lowercase();
        let next = match &prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, key_segment),
            _ => key_segment,
        };
        result.extend(flatten_value(value, Some(next)));
    }
    result
}
