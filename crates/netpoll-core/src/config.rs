//! Scheduler configuration.
//!
//! Reading the configuration file is up to the host process; this module only
//! defines the shape, the defaults and the environment overrides.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::ConfigError;

/// Default number of concurrent workers.
pub const DEFAULT_MAX_WORKERS: usize = 16;
/// Default interval between inventory and type refreshes (5 minutes).
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;

/// Environment variable names.
pub mod env_vars {
    pub const MAX_WORKERS: &str = "NETPOLL_MAX_WORKERS";
    pub const REFRESH_INTERVAL_SECS: &str = "NETPOLL_REFRESH_INTERVAL_SECS";
    pub const SYSNAME_FILTER: &str = "NETPOLL_SYSNAME_FILTER";
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_refresh_interval_secs() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently active workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Seconds between inventory and type refreshes
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Only poll netboxes whose sysname matches this `LIKE` pattern
    #[serde(default)]
    pub sysname_filter: Option<String>,

    /// Opaque configuration handed to every device handler
    #[serde(default)]
    pub handler_config: Value,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            sysname_filter: None,
            handler_config: Value::Null,
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with the given worker count.
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Default::default()
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval_secs = interval.as_secs();
        self
    }

    pub fn with_sysname_filter(mut self, pattern: impl Into<String>) -> Self {
        self.sysname_filter = Some(pattern.into());
        self
    }

    pub fn with_handler_config(mut self, config: Value) -> Self {
        self.handler_config = config;
        self
    }

    /// Refresh interval as a `Duration`.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Check the configuration for values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_workers",
                message: "must be at least 1".to_string(),
            });
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "refresh_interval_secs",
                message: "must be at least 1 second".to_string(),
            });
        }
        if let Some(filter) = &self.sysname_filter {
            if filter.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "sysname_filter",
                    message: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Override fields from `NETPOLL_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>(env_vars::MAX_WORKERS) {
            self.max_workers = v;
        }
        if let Some(v) = env_parse::<u64>(env_vars::REFRESH_INTERVAL_SECS) {
            self.refresh_interval_secs = v;
        }
        if let Ok(v) = std::env::var(env_vars::SYSNAME_FILTER) {
            self.sysname_filter = Some(v);
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
