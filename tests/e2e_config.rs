//! E2E tests for persistent configuration
//!
//! Tests config round-trip, defaults, backward compatibility and that a
//! saved config starts a working coordinator.

use biostream::config::AppConfig;
use biostream::Coordinator;
use biostream_server::source::SourceKind;
use std::path::PathBuf;

/// Test a config saved to disk starts an identical stream
#[test]
fn test_saved_config_drives_coordinator() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("biostream").join("config.json");

    let mut config = AppConfig::default();
    config.sample_rate = 250;
    config.max_clients = 2;
    config.filter.highcut_hz = 40.0;
    config.source = "file:/dev/ttyACM0".to_string();
    config.save(&path).unwrap();

    let loaded = AppConfig::load_from(&path);
    assert_eq!(loaded, config);
    assert_eq!(
        loaded.source_kind().unwrap(),
        SourceKind::File(PathBuf::from("/dev/ttyACM0"))
    );

    let mut coordinator = Coordinator::new(loaded.stream_config()).unwrap();
    let status = coordinator.status();
    assert_eq!(status.sample_rate, 250);
    assert_eq!(status.max_clients, 2);
    assert_eq!(status.filter_config.highcut_hz, 40.0);
    assert_eq!(status.filter_config.sample_rate_hz, 250.0);
}

/// Test older config files without newer fields still load
#[test]
fn test_partial_config_backward_compatible() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"port": 9001, "password": "legacy"}"#).unwrap();

    let config = AppConfig::load_from(&path);
    assert_eq!(config.port, 9001);
    assert_eq!(config.password, "legacy");
    assert_eq!(config.buffer_capacity, 1000);
    assert_eq!(config.source, "push");
}

/// Test a filter the sample rate cannot carry is refused at startup
#[test]
fn test_invalid_filter_config_rejected() {
    let mut config = AppConfig::default();
    config.sample_rate = 50;
    // 45 Hz is above the 25 Hz Nyquist limit
    assert!(Coordinator::new(config.stream_config()).is_err());

    config.filter.highcut_hz = 20.0;
    assert!(Coordinator::new(config.stream_config()).is_ok());
}

/// Test a missing file gives defaults
#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load_from(&dir.path().join("absent.json"));
    assert_eq!(config, AppConfig::default());
}
