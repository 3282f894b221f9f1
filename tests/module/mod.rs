//! Module runtime tests
//!
//! Resolution scenarios, fragments, the service registry, event delivery,
//! concurrent use and configuration loading.

pub mod test_utils;
pub mod resolution_tests;
pub mod fragment_tests;
pub mod event_tests;
pub mod concurrency_tests;
pub mod config_tests;
