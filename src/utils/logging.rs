//! Logging initialization for hosts embedding the module runtime
//!
//! The runtime itself only emits `tracing` events; installing a subscriber is
//! left to the embedding process. These helpers give it the usual setup:
//! `RUST_LOG` wins, then the configured filter, then `info`.
//!
//! ```rust,no_run
//! use bllvm_modules::config::LoggingConfig;
//! use bllvm_modules::utils::init_logging_from_config;
//!
//! init_logging_from_config(&LoggingConfig::default()).ok();
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Filter used when neither `RUST_LOG` nor a configured filter is present
pub const DEFAULT_FILTER: &str = "info";

/// Build the effective filter; `RUST_LOG` takes precedence over `configured`
pub fn build_filter(configured: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(configured.unwrap_or(DEFAULT_FILTER))
}

/// Install a human-readable subscriber on stderr
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(filter: Option<&str>) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(build_filter(filter))
        .try_init()?;
    Ok(())
}

/// Install a JSON subscriber for log aggregation
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(build_filter(filter))
        .try_init()?;
    Ok(())
}

/// Install a subscriber as described by the runtime configuration
///
/// `json_format` falls back to plain output when the `json-logging` feature
/// is disabled.
pub fn init_logging_from_config(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = config.filter.as_deref();
    if config.json_format {
        #[cfg(feature = "json-logging")]
        return init_json_logging(filter);
    }
    init_logging(filter)
}
