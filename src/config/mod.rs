//! Configuration management for the module runtime
//!
//! Handles configuration loading for the resolver, the event dispatcher and
//! logging. Every field has a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Optimistic commit attempts before searching under the exclusive graph lock
    #[serde(default = "default_max_commit_retries")]
    pub max_commit_retries: u32,

    /// Initial backoff between optimistic attempts (milliseconds)
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Upper bound for the backoff (milliseconds)
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Search steps allowed per target before it fails with `SearchLimitExceeded`
    #[serde(default = "default_max_search_steps")]
    pub max_search_steps: u64,
}

fn default_max_commit_retries() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    1
}

fn default_retry_max_delay_ms() -> u64 {
    50
}

fn default_max_search_steps() -> u64 {
    1_000_000
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: default_max_commit_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            max_search_steps: default_max_search_steps(),
        }
    }
}

impl ResolverConfig {
    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Event dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Name of the delivery thread
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Listener failures kept for `recent_failures()`
    #[serde(default = "default_max_recorded_failures")]
    pub max_recorded_failures: usize,
}

fn default_thread_name() -> String {
    "module-events".to_string()
}

fn default_max_recorded_failures() -> usize {
    1000
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            max_recorded_failures: default_max_recorded_failures(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive (e.g. "info", "bllvm_modules=debug"); `RUST_LOG` wins when set
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub events: EventConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RuntimeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RuntimeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
