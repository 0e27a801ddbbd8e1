//! Config loading from disk and spec/error mapping end to end.

use std::fs;
use std::path::PathBuf;

use serde_json::json;
use tempfile::TempDir;
use walletd_core::config::{Config, ConfigError, ReconnectPolicy};
use walletd_core::errors::{ErrorMapper, KindRegistry, MappedError};
use walletd_core::spec::SpecDocument;

// ========== File I/O ==========

#[test]
fn test_config_from_file_success() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("walletd.yaml");

    let yaml = r#"
url: http://127.0.0.1:5000
user: merchant
password: hunter2
poll_interval_ms: 250
reconnect:
  policy: backoff
  initial_ms: 100
  max_ms: 400
"#;
    fs::write(&path, yaml).unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.user, "merchant");
    assert_eq!(config.poll_interval_ms, 250);
    assert_eq!(
        config.reconnect,
        ReconnectPolicy::Backoff {
            initial_ms: 100,
            max_ms: 400
        }
    );
    assert_eq!(config.spec_url().unwrap().as_str(), "http://127.0.0.1:5000/spec");
}

#[test]
fn test_config_from_file_not_found() {
    let result = Config::from_file(&PathBuf::from("/nonexistent/walletd.yaml"));
    match result.unwrap_err() {
        ConfigError::IoError(_) => (),
        e => panic!("Expected IoError, got {:?}", e),
    }
}

#[test]
fn test_config_from_file_bad_yaml() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("walletd.yaml");
    fs::write(&path, "url: [unclosed\n").unwrap();

    match Config::from_file(&path).unwrap_err() {
        ConfigError::ParseError(_) => (),
        e => panic!("Expected ParseError, got {:?}", e),
    }
}

#[test]
fn test_config_bad_proxy_rejected() {
    let err = Config::from_yaml("proxy: \"not a url\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidUrl { .. }));
}

// ========== Spec + mapper ==========

#[test]
fn test_fetched_spec_replaces_builtin_mapping() {
    let registry = KindRegistry::new();
    let mapper = ErrorMapper::with_registry(&registry);

    let builtin = SpecDocument::default();
    match mapper.map(&builtin, -32600, "ignored") {
        MappedError::Known(err) => assert!(err.is("UnauthorizedError")),
        e => panic!("Expected known error, got {:?}", e),
    }
    assert!(matches!(
        mapper.map(&builtin, -32001, "Invalid address"),
        MappedError::Unknown { code: -32001, .. }
    ));

    let fetched = SpecDocument::from_value(&json!({
        "version": "0.5",
        "exceptions": {
            "-32001": {"exc_name": "InvalidAddressError", "docstring": "Invalid address"}
        }
    }))
    .unwrap();
    match mapper.map(&fetched, -32001, "raw") {
        MappedError::Known(err) => {
            assert_eq!(err.kind.name(), "InvalidAddressError");
            assert_eq!(err.message, "Invalid address");
        }
        e => panic!("Expected known error, got {:?}", e),
    }
}
