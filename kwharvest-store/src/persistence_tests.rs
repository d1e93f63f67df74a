//! Persistence and config file tests.

use std::path::PathBuf;
use tempfile::TempDir;

use crate::config::{Config, CredentialConfig, KeyEntry};
use crate::persistence::{ensure_parent_dir, read_json, write_json};
use kwharvest_core::Provider;

#[test]
fn test_write_and_read_json() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("data.json");

    write_json(&path, &serde_json::json!({"key": "value"})).unwrap();
    let loaded: serde_json::Value = read_json(&path).unwrap();

    assert_eq!(loaded["key"], "value");
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn test_write_creates_parent_directories() {
    let temp_dir = TempDir::new().unwrap();
    let nested = temp_dir.path().join("deeply").join("nested").join("config.json");

    write_json(&nested, &serde_json::json!([])).unwrap();
    assert!(nested.exists());
}

#[cfg(unix)]
#[test]
fn test_written_file_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    write_json(&path, &Config::default()).unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn test_ensure_parent_dir_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("db").join("kwharvest.db");

    ensure_parent_dir(&path).unwrap();
    ensure_parent_dir(&path).unwrap();
    assert!(path.parent().unwrap().is_dir());
}

#[test]
fn test_missing_config_file_gives_defaults() {
    let config = Config::load_from(&PathBuf::from("/nonexistent/kwharvest/config.json")).unwrap();
    assert!(config.credentials.is_empty());
    assert_eq!(config.queue.related_batch_size, 5);
}

#[test]
fn test_config_roundtrip_keeps_credentials() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");

    let mut config = Config::default();
    config.credentials.push(CredentialConfig {
        provider: Provider::SearchAd,
        key: KeyEntry {
            label: "main".to_string(),
            key_id: "license".to_string(),
            key_secret: "secret".to_string(),
            customer_id: Some("123".to_string()),
            qps: Some(1.0),
            daily: None,
        },
    });
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded.credentials.len(), 1);
    assert_eq!(loaded.credentials[0].key.customer_id.as_deref(), Some("123"));
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_invalid_json_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(Config::load_from(&path).is_err());
}
