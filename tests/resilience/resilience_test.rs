// tests/resilience/resilience_test.rs
#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use schemata::config::SettingsHandle;
use schemata::error::{EngineError, ErrorKind};
use schemata::provider::{MemoryProvider, ProviderError};
use schemata::resilience::{CircuitState, ResilientProvider};

use common::{resilient, shop_provider, test_settings};

/// One attempt per call and a breaker that opens after five failures.
fn fail_fast() -> (Arc<ResilientProvider>, Arc<MemoryProvider>) {
    let provider = shop_provider();
    let mut settings = test_settings();
    settings.resilience.retry.max_attempts = 1;
    settings.resilience.breaker.failure_threshold = 5;
    let handle = SettingsHandle::new(settings).unwrap();
    (resilient(&provider, &handle), provider)
}

async fn trip(resilient: &ResilientProvider, provider: &MemoryProvider) {
    provider.fail_always(ProviderError::Timeout(Duration::from_secs(1)));
    for _ in 0..5 {
        let err = resilient.discover_databases().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }
    assert_eq!(resilient.circuit_state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_fails_fast_without_network() {
    let (resilient, provider) = fail_fast();
    trip(&resilient, &provider).await;
    assert_eq!(provider.call_count(), 5);

    let err = resilient.discover_databases().await.unwrap_err();
    match err {
        EngineError::CircuitOpen { endpoint, retry_after } => {
            assert_eq!(endpoint, "mem");
            assert_eq!(retry_after, Duration::from_secs(30));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(provider.call_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_single_trial_after_cooldown_closes_circuit() {
    let (resilient, provider) = fail_fast();
    trip(&resilient, &provider).await;

    tokio::time::advance(Duration::from_secs(31)).await;
    provider.clear_faults();
    provider.set_latency(Some(Duration::from_millis(100)));

    let (trial, rival) = tokio::join!(resilient.discover_databases(), resilient.discover_databases());
    assert_eq!(trial.unwrap().len(), 1);
    assert_eq!(rival.unwrap_err().kind(), ErrorKind::CircuitOpen);

    assert_eq!(resilient.circuit_state(), CircuitState::Closed);
    assert_eq!(resilient.breaker().consecutive_failures(), 0);
    assert!(resilient.discover_tables("shop").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_reopens_circuit() {
    let (resilient, provider) = fail_fast();
    trip(&resilient, &provider).await;

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(resilient.discover_databases().await.is_err());
    assert_eq!(resilient.circuit_state(), CircuitState::Open);

    let calls = provider.call_count();
    let err = resilient.discover_databases().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(provider.call_count(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_provider_answers_do_not_trip_breaker() {
    let (resilient, provider) = fail_fast();
    provider.fail_always(ProviderError::NotFound("shop.nowhere".into()));

    for _ in 0..10 {
        let err = resilient.describe_table("shop", "nowhere").await.unwrap_err();
        assert_ne!(err.kind(), ErrorKind::CircuitOpen);
    }
    assert_eq!(resilient.circuit_state(), CircuitState::Closed);
    assert_eq!(provider.call_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_transient_blips_are_retried_with_backoff() {
    let provider = shop_provider();
    let handle = SettingsHandle::new(test_settings()).unwrap();
    let resilient = resilient(&provider, &handle);
    provider.fail_next(ProviderError::ConnectionReset("broken pipe".into()), 2);

    let started = tokio::time::Instant::now();
    let tables = resilient.discover_tables("shop").await.unwrap();
    assert_eq!(tables.len(), 4);
    assert_eq!(provider.call_count(), 3);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(300));
    assert!(waited < Duration::from_millis(400));
    assert_eq!(resilient.circuit_state(), CircuitState::Closed);
}
