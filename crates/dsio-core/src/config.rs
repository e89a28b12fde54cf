//! Replay and detector configuration.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields take the defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{DsioError, Result};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_INTERVAL_MS: i64 = 10_000;
pub const DEFAULT_INDEX_NAME: &str = "dsio";

/// Tuning parameters handed to detector constructors.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DetectorParams {
    /// Probability threshold for the decision rule
    pub threshold: f64,
    /// Decay applied to the effective sample size between updates
    pub forgetting_factor: f64,
    /// Retained window; each variant has its own default when unset
    pub window_size: Option<usize>,
    pub n_neighbors: usize,
    /// Expected anomalous fraction for percentile thresholds
    pub contamination: f64,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            threshold: 0.99,
            forgetting_factor: 0.9,
            window_size: None,
            n_neighbors: 20,
            contamination: 0.1,
        }
    }
}

/// Bounded exponential backoff for sink uploads.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        self.base_delay_ms.saturating_mul(1u64 << attempt.min(16))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    /// Rows per batch upper bound
    pub max_batch_size: usize,
    /// Virtual window length in milliseconds
    pub interval_ms: i64,
    /// Wait for the wall clock between windows
    pub pacing: bool,
    /// Virtual milliseconds replayed per wall-clock millisecond
    pub speed: f64,
    /// Target name passed to the sink and the dashboard
    pub index_name: String,
    pub retry: RetryPolicy,
    /// Capacity of the live feed queue
    pub feed_capacity: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            interval_ms: DEFAULT_INTERVAL_MS,
            pacing: true,
            speed: 1.0,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            retry: RetryPolicy::default(),
            feed_capacity: 64,
        }
    }
}

impl ReplayConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| DsioError::invalid_parameter("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(DsioError::invalid_parameter(
                "max_batch_size",
                "must be a positive integer",
            ));
        }
        if self.interval_ms <= 0 {
            return Err(DsioError::invalid_parameter(
                "interval_ms",
                format!("must be positive, got {}", self.interval_ms),
            ));
        }
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(DsioError::invalid_parameter(
                "speed",
                format!("must be positive, got {}", self.speed),
            ));
        }
        if self.index_name.is_empty() {
            return Err(DsioError::invalid_parameter("index_name", "must not be empty"));
        }
        Ok(())
    }
}

/// Combined file layout: `{ "replay": {...}, "detector": {...} }`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct RunConfig {
    pub replay: ReplayConfig,
    pub detector: DetectorParams,
    #[serde(skip)]
    index_name_set: bool,
}

impl RunConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let invalid = |e: serde_json::Error| DsioError::invalid_parameter("config", e.to_string());
        let value: serde_json::Value = serde_json::from_str(text).map_err(invalid)?;
        let index_name_set = value.pointer("/replay/index_name").is_some();
        let mut config: Self = serde_json::from_value(value).map_err(invalid)?;
        config.index_name_set = index_name_set;
        config.replay.validate()?;
        Ok(config)
    }

    /// Whether `replay.index_name` came from the config file rather than the default.
    pub fn sets_index_name(&self) -> bool {
        self.index_name_set
    }
}
