//! Configuration Integration Tests
//!
//! Config file on disk through to the settings a session runs with.

use std::time::Duration;

use companion_desktop::models::settings::RemoteControlSettingsUpdate;
use companion_desktop::services::remote::{ReconnectConfig, SessionSettings};
use companion_desktop::storage::ConfigService;
use companion_desktop::{AppError, RemoteControlConfig};
use tempfile::tempdir;

#[test]
fn test_first_run_writes_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("remote_control.json");
    let service = ConfigService::with_path(path.clone()).unwrap();

    assert!(path.exists());
    let on_disk: RemoteControlConfig =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(&on_disk, service.get_config());

    let settings = SessionSettings::from(service.get_config());
    assert_eq!(settings.session_ttl, Duration::from_secs(4 * 60 * 60));
    assert_eq!(settings.code_length, 6);
    assert_eq!(settings.max_code_attempts, 5);
    assert_eq!(settings.feedback_hide_ms, 2000);
}

#[test]
fn test_partial_file_uses_defaults_for_optional_fields() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("remote_control.json");
    std::fs::write(
        &path,
        r#"{
            "relay_url": "wss://relay.example.com/relay",
            "session_ttl_secs": 3600,
            "code_length": 8,
            "feedback_hide_ms": 1500,
            "command_queue_capacity": 16
        }"#,
    )
    .unwrap();

    let service = ConfigService::with_path(path).unwrap();
    let config = service.get_config();
    assert_eq!(config.max_code_attempts, 5);
    assert_eq!(config.reconnect, ReconnectConfig::default());
    assert_eq!(SessionSettings::from(config).session_ttl, Duration::from_secs(3600));
}

#[test]
fn test_rejects_non_websocket_relay() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("remote_control.json");
    let mut service = ConfigService::with_path(path).unwrap();

    let err = service
        .update_config(RemoteControlSettingsUpdate {
            relay_url: Some("http://relay.example.com".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(service.get_config(), &RemoteControlConfig::default());
}

#[test]
fn test_short_ttl_is_rejected_on_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("remote_control.json");
    let mut config = RemoteControlConfig::default();
    config.session_ttl_secs = 5;
    std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

    assert!(matches!(
        ConfigService::with_path(path),
        Err(AppError::Validation(_))
    ));
}
