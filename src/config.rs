//! Configuration management for Trickle.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TrickleError};

/// Main configuration for Trickle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrickleConfig {
    /// Token bucket configuration
    #[serde(default)]
    pub bucket: BucketConfig,

    /// Demonstration driver configuration
    #[serde(default)]
    pub demo: DemoConfig,
}

/// Token bucket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Tokens added on every tick
    #[serde(default = "default_refill_rate")]
    pub refill_rate: u64,

    /// Maximum number of tokens the bucket holds
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Milliseconds between replenishment ticks
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            refill_rate: default_refill_rate(),
            capacity: default_capacity(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl BucketConfig {
    /// The tick interval as a `Duration`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Reject values the bucket cannot be built from.
    pub fn validate(&self) -> Result<()> {
        check_bucket_params(self.refill_rate, self.capacity, self.tick_interval())
    }
}

/// Bucket parameter checks, shared by config validation and construction.
pub(crate) fn check_bucket_params(
    refill_rate: u64,
    capacity: u64,
    tick_interval: Duration,
) -> Result<()> {
    if refill_rate == 0 {
        return Err(TrickleError::Config(
            "refill_rate must be greater than zero".to_string(),
        ));
    }
    if capacity == 0 {
        return Err(TrickleError::Config(
            "capacity must be greater than zero".to_string(),
        ));
    }
    if tick_interval.is_zero() {
        return Err(TrickleError::Config(
            "tick_interval must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn default_refill_rate() -> u64 {
    5
}

fn default_capacity() -> u64 {
    5
}

fn default_tick_interval_ms() -> u64 {
    1000
}

/// Demonstration driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Number of requests the driver issues
    #[serde(default = "default_requests")]
    pub requests: u32,

    /// Pause between requests in milliseconds
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            pace_ms: default_pace_ms(),
        }
    }
}

impl DemoConfig {
    /// The pause between requests as a `Duration`.
    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }
}

fn default_requests() -> u32 {
    15
}

fn default_pace_ms() -> u64 {
    200
}

impl TrickleConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TrickleError::Config(e.to_string()))
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.bucket.validate()
    }
}
