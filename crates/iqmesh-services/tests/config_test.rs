//! Service Configuration Tests

use std::io::Write;

use iqmesh_services::ServiceConfig;

#[test]
fn test_load_partial_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
default_repeat = 3

[dpa]
retry_delay_ms = 10
"#
    )
    .unwrap();

    let config = ServiceConfig::load(file.path()).unwrap();

    assert_eq!(config.default_repeat, 3);
    assert_eq!(config.dpa.retry_delay_ms, 10);
    assert_eq!(config.dpa.default_timeout_ms, 500);
    assert_eq!(config.dpa.node_timeout_ms, 2000);
}

#[test]
fn test_empty_file_uses_defaults() {
    let config = ServiceConfig::from_toml_str("").unwrap();
    assert_eq!(config, ServiceConfig::default());
    assert_eq!(config.default_repeat, 1);
}

#[test]
fn test_invalid_file_is_a_parsing_error() {
    let err = ServiceConfig::from_toml_str("default_repeat = \"many\"").unwrap_err();
    assert_eq!(err.status(), 1001);
}

#[test]
fn test_missing_file() {
    assert!(ServiceConfig::load("/nonexistent/iqmesh.toml").is_err());
}
