//! Configuration structures.
//!
//! Configuration is loaded from a JSON file; every section falls back to its
//! defaults when omitted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};

/// Global runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Module loop tuning.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a JSON file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall every module loop.
    pub fn validate(&self) -> Result<()> {
        self.runtime.validate()
    }
}

/// Per-module loop tuning, shared by every module a registry creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum mailbox events drained per loop tick.
    pub mailbox_batch: usize,

    /// Maximum timers fired per loop tick, so a timer storm cannot starve the mailbox.
    pub timer_budget: u32,

    /// Upper bound on how long an idle loop sleeps before re-checking its timers.
    #[serde(with = "humantime_serde")]
    pub max_idle: Duration,

    /// Maximum recycled argument buffers kept per event kind.
    pub args_pool_capacity: usize,

    /// Period for logging per-module dispatch counters. Disabled when absent.
    #[serde(with = "humantime_serde")]
    pub stats_interval: Option<Duration>,

    /// Bound applied by `ModuleHandle::await_rpc_call_bounded`.
    #[serde(with = "humantime_serde")]
    pub await_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mailbox_batch: 1024,
            timer_budget: 256,
            max_idle: Duration::from_millis(64),
            args_pool_capacity: 64,
            stats_interval: None,
            await_timeout: Duration::from_secs(30),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mailbox_batch == 0 {
            return Err(Error::config("runtime.mailbox_batch must be at least 1"));
        }
        if self.timer_budget == 0 {
            return Err(Error::config("runtime.timer_budget must be at least 1"));
        }
        if self.max_idle.is_zero() {
            return Err(Error::config("runtime.max_idle must be non-zero"));
        }
        Ok(())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error), used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
