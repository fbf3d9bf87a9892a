// tests/config/settings_test.rs
#[path = "../common/mod.rs"]
mod common;

use std::io::Write;
use std::sync::Arc;

use schemata::config::{EngineSettings, SettingsError, SettingsHandle};
use schemata::engine::EngineState;
use schemata::error::ErrorKind;
use schemata::provider::MemoryConnector;
use tempfile::NamedTempFile;

use common::{shop_provider, test_settings};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
[provider]
driver = "postgres"
databases = ["shop"]

[cache]
capacity = 500
warm_keys = ["tables:shop", "table:shop.sales"]

[resilience.breaker]
failure_threshold = 3
"#,
    );

    let settings = EngineSettings::from_file(file.path()).unwrap();
    assert_eq!(settings.provider.driver, "postgres");
    assert_eq!(settings.provider.databases, vec!["shop"]);
    assert_eq!(settings.cache.capacity, 500);
    assert_eq!(settings.cache.warm_keys.len(), 2);
    assert_eq!(settings.cache.metadata_ttl_seconds, 300);
    assert_eq!(settings.resilience.breaker.failure_threshold, 3);
    assert_eq!(settings.resilience.breaker.cooldown_ms, 30_000);
    assert_eq!(settings.mapper.min_confidence, 0.5);
    assert_eq!(settings.query.dialect, "mysql");
}

#[test]
fn test_missing_file_is_reported() {
    let err = EngineSettings::from_file("/nonexistent/schemata.toml").unwrap_err();
    assert!(matches!(err, SettingsError::FileNotFound(_)));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let err = EngineSettings::from_toml("[cache\ncapacity = 1").unwrap_err();
    assert!(matches!(err, SettingsError::ParseError(_)));
}

#[test]
fn test_out_of_range_values_name_the_field() {
    let cases = [
        ("[cache]\ncapacity = 0", "cache.capacity"),
        ("[mapper]\nmin_confidence = 1.5", "mapper.min_confidence"),
        ("[query]\ndialect = \"oracle\"", "query.dialect"),
        ("[resilience.retry]\nmax_attempts = 0", "resilience.retry.max_attempts"),
        (
            "[resilience.pool]\nmax_open_conns = 2\nmax_idle_conns = 4",
            "resilience.pool.max_idle_conns",
        ),
    ];
    for (toml, expected) in cases {
        match EngineSettings::from_toml(toml) {
            Err(SettingsError::InvalidValue { field, .. }) => assert_eq!(field, expected, "{}", toml),
            other => panic!("expected invalid '{}', got {:?}", expected, other),
        }
    }
}

#[test]
fn test_connection_string_expands_environment() {
    std::env::set_var("SCHEMATA_TEST_DB_HOST", "db.internal");
    let settings = EngineSettings::from_toml(
        "[provider]\nconnection_string = \"mysql://${SCHEMATA_TEST_DB_HOST}:3306/shop\"",
    )
    .unwrap();
    assert_eq!(
        settings.provider.resolved_connection_string().unwrap(),
        "mysql://db.internal:3306/shop"
    );

    let unset = EngineSettings::from_toml("[provider]\nconnection_string = \"${SCHEMATA_TEST_UNSET_VAR}\"").unwrap();
    assert!(matches!(
        unset.provider.resolved_connection_string(),
        Err(SettingsError::MissingEnvVar(name)) if name == "SCHEMATA_TEST_UNSET_VAR"
    ));
}

#[tokio::test]
async fn test_subscribers_see_reloads() {
    let handle = SettingsHandle::new(test_settings()).unwrap();
    let mut rx = handle.subscribe();

    let mut next = test_settings();
    next.mapper.min_confidence = 0.6;
    handle.update(next).unwrap();

    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().mapper.min_confidence, 0.6);

    let mut bad = test_settings();
    bad.resilience.breaker.failure_threshold = 0;
    assert!(handle.update(bad).is_err());
    assert_eq!(handle.current().resilience.breaker.failure_threshold, 5);
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test]
async fn test_engine_refuses_invalid_settings() {
    let mut settings = test_settings();
    settings.cache.capacity = 0;
    let connector = Arc::new(MemoryConnector::new("mem", shop_provider()));

    let err = EngineState::init(settings, connector, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_store_file_is_created_on_init() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.db");
    let mut settings = test_settings();
    settings.store.in_memory = false;
    settings.store.path = Some(path.to_string_lossy().into_owned());
    let connector = Arc::new(MemoryConnector::new("mem", shop_provider()));

    let engine = EngineState::init(settings, connector, None).await.unwrap();
    engine.detector().check_database("shop").await.unwrap();
    assert!(path.exists());
    engine.shutdown().await;
}
