//! Configuration loading tests

use std::io::Write;

use bllvm_modules::{ModuleManager, RuntimeConfig};
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_json_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("runtime.json");

    let mut config = RuntimeConfig::default();
    config.resolver.max_commit_retries = 7;
    config.events.thread_name = "test-events".to_string();
    config.logging.filter = Some("bllvm_modules=debug".to_string());
    config.to_json_file(&path).unwrap();

    let loaded = RuntimeConfig::from_json_file(&path).unwrap();
    assert_eq!(loaded.resolver.max_commit_retries, 7);
    assert_eq!(loaded.events.thread_name, "test-events");
    assert_eq!(loaded.logging.filter.as_deref(), Some("bllvm_modules=debug"));
}

#[test]
fn test_partial_toml_uses_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[resolver]\nmax_search_steps = 500\n\n[logging]\njson_format = true"
    )
    .unwrap();

    let config = RuntimeConfig::from_toml_file(file.path()).unwrap();
    assert_eq!(config.resolver.max_search_steps, 500);
    assert_eq!(config.resolver.max_commit_retries, 3);
    assert_eq!(config.events.max_recorded_failures, 1000);
    assert!(config.logging.json_format);

    let manager = ModuleManager::new(&config).unwrap();
    assert_eq!(manager.events().listener_count(), 0);
}

#[test]
fn test_missing_or_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(RuntimeConfig::from_json_file(&dir.path().join("absent.json")).is_err());

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{{ not json").unwrap();
    assert!(RuntimeConfig::from_json_file(file.path()).is_err());
}
