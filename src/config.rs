//! Engine configuration
//!
//! Loaded in three tiers: TOML file (or built-in defaults), then
//! `BUTTERFLY_REACH_*` environment overrides, then validation.
//!
//! ```toml
//! [workers]
//! threads = 8
//! queue_capacity = 16
//! batch_timeout_ms = 60000
//!
//! [contraction]
//! witness_settle_limit = 500
//!
//! [query]
//! strategy = "bounded"
//! overlay_fallback_threshold = 64
//!
//! [speeds]
//! walk = 5.0
//! bike = 15.0
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::mode::Mode;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub workers: WorkerConfig,
    pub contraction: ContractionConfig,
    pub query: QueryConfig,
    pub speeds: ModeSpeeds,
}

/// Batch worker pool sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Worker threads; 0 = one per CPU core
    pub threads: usize,
    /// Batches that may wait for the pool before submitters block
    pub queue_capacity: usize,
    /// Cooperative deadline for a whole batch
    pub batch_timeout_ms: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            queue_capacity: 16,
            batch_timeout_ms: None,
        }
    }
}

impl WorkerConfig {
    pub fn resolved_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }
}

/// Hierarchy preprocessing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContractionConfig {
    /// Nodes a witness search may settle before it gives up and keeps the shortcut
    pub witness_settle_limit: usize,
    /// Minimum in-neighbours before witness searches of one node go parallel
    pub parallel_witness_min: usize,
}

impl Default for ContractionConfig {
    fn default() -> Self {
        Self {
            witness_settle_limit: 500,
            parallel_witness_min: 8,
        }
    }
}

/// Search algorithm for overlay-free queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Bounded Dijkstra over upward and downward arcs
    #[default]
    Bounded,
    /// Bounded upward search followed by a linear downward sweep
    Phast,
}

impl FromStr for SearchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bounded" => Ok(SearchStrategy::Bounded),
            "phast" => Ok(SearchStrategy::Phast),
            other => Err(format!("unknown search strategy '{other}'")),
        }
    }
}

/// Query parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    pub strategy: SearchStrategy,
    /// Overlays with more operations than this bypass the hierarchy
    pub overlay_fallback_threshold: usize,
    /// Cooperative deadline for a single query
    pub timeout_ms: Option<u64>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            strategy: SearchStrategy::Bounded,
            overlay_fallback_threshold: 64,
            timeout_ms: None,
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Average speeds (km/h) used to derive time costs from `length_m` for modes
/// whose cost column is absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModeSpeeds {
    pub walk: Option<f64>,
    pub bike: Option<f64>,
    pub car: Option<f64>,
    pub transit: Option<f64>,
}

impl Default for ModeSpeeds {
    fn default() -> Self {
        Self {
            walk: Some(5.0),
            bike: Some(15.0),
            car: None,
            transit: None,
        }
    }
}

impl ModeSpeeds {
    pub fn none() -> Self {
        Self {
            walk: None,
            bike: None,
            car: None,
            transit: None,
        }
    }

    pub fn get(&self, mode: Mode) -> Option<f64> {
        match mode {
            Mode::Walk => self.walk,
            Mode::Bike => self.bike,
            Mode::Car => self.car,
            Mode::Transit => self.transit,
        }
    }

    /// Travel time in seconds over `length_m` metres
    pub fn seconds_for(&self, mode: Mode, length_m: f64) -> Option<f64> {
        self.get(mode).map(|kmh| length_m / (kmh / 3.6))
    }
}

impl EngineConfig {
    /// Load from an optional TOML file, apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&content)?
            }
            None => EngineConfig::default(),
        };

        config.apply_environment_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Supported variables:
    /// - `BUTTERFLY_REACH_THREADS` -> `workers.threads`
    /// - `BUTTERFLY_REACH_QUEUE_CAPACITY` -> `workers.queue_capacity`
    /// - `BUTTERFLY_REACH_BATCH_TIMEOUT_MS` -> `workers.batch_timeout_ms`
    /// - `BUTTERFLY_REACH_WITNESS_SETTLE_LIMIT` -> `contraction.witness_settle_limit`
    /// - `BUTTERFLY_REACH_STRATEGY` -> `query.strategy`
    /// - `BUTTERFLY_REACH_OVERLAY_FALLBACK` -> `query.overlay_fallback_threshold`
    /// - `BUTTERFLY_REACH_QUERY_TIMEOUT_MS` -> `query.timeout_ms`
    pub fn apply_environment_overrides(&mut self) {
        override_from_env("BUTTERFLY_REACH_THREADS", &mut self.workers.threads);
        override_from_env(
            "BUTTERFLY_REACH_QUEUE_CAPACITY",
            &mut self.workers.queue_capacity,
        );
        override_option_from_env(
            "BUTTERFLY_REACH_BATCH_TIMEOUT_MS",
            &mut self.workers.batch_timeout_ms,
        );
        override_from_env(
            "BUTTERFLY_REACH_WITNESS_SETTLE_LIMIT",
            &mut self.contraction.witness_settle_limit,
        );
        override_from_env("BUTTERFLY_REACH_STRATEGY", &mut self.query.strategy);
        override_from_env(
            "BUTTERFLY_REACH_OVERLAY_FALLBACK",
            &mut self.query.overlay_fallback_threshold,
        );
        override_option_from_env("BUTTERFLY_REACH_QUERY_TIMEOUT_MS", &mut self.query.timeout_ms);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "workers.queue_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.contraction.witness_settle_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "contraction.witness_settle_limit",
                reason: "must be at least 1".into(),
            });
        }
        for &mode in Mode::all() {
            if let Some(kmh) = self.speeds.get(mode) {
                if !kmh.is_finite() || kmh <= 0.0 {
                    return Err(ConfigError::Invalid {
                        field: "speeds",
                        reason: format!("{mode} speed {kmh} km/h must be positive and finite"),
                    });
                }
            }
        }
        Ok(())
    }
}

fn override_from_env<T: FromStr>(var: &str, target: &mut T) {
    if let Ok(value) = env::var(var) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var, value, "ignoring unparsable environment override"),
        }
    }
}

fn override_option_from_env<T: FromStr>(var: &str, target: &mut Option<T>) {
    if let Ok(value) = env::var(var) {
        match value.parse() {
            Ok(parsed) => *target = Some(parsed),
            Err(_) => tracing::warn!(var, value, "ignoring unparsable environment override"),
        }
    }
}
