//! Shared utilities

pub mod logging;
pub mod retry;
pub mod time;

pub use logging::{build_filter, init_logging, init_logging_from_config};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use retry::{retry_if_retryable, IsRetryable, RetryConfig};
pub use time::current_timestamp;
