// tests/engine/scenarios_test.rs
//! End-to-end scenarios through `EngineState`.
#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use schemata::engine::BuildOptions;
use schemata::error::ErrorKind;
use schemata::mapper::MatchMethod;
use schemata::planner::{Aggregation, QueryIntent};
use schemata::provider::ProviderError;
use schemata::resilience::CircuitState;

use common::{engine, engine_with, shop_provider, test_settings};

fn monthly_revenue() -> QueryIntent {
    QueryIntent::new("revenue")
        .aggregate(Aggregation::Sum)
        .group_by("month")
        .filter("year", 2024)
}

#[tokio::test]
async fn test_scenario_exact_term_mapping() {
    let provider = shop_provider();
    let engine = engine(&provider).await;

    let mappings = engine.resolve("revenue", None, None).await.unwrap();
    assert_eq!(mappings[0].path.to_string(), "shop.sales.revenue");
    assert_eq!(mappings[0].confidence, 1.0);
    assert_eq!(mappings[0].method, MatchMethod::Exact);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_scenario_monthly_revenue() {
    let provider = shop_provider();
    let engine = engine(&provider).await;

    let query = engine.build(&monthly_revenue(), &BuildOptions::default()).await.unwrap();
    assert_eq!(
        query.sql,
        "SELECT DATE_FORMAT(date, '%Y-%m') AS month, SUM(revenue) FROM sales WHERE YEAR(date) = 2024 GROUP BY month"
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_scenario_join_through_foreign_key() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let intent = QueryIntent::new("orders")
        .aggregate(Aggregation::Count)
        .group_by("customer region");

    let query = engine.build(&intent, &BuildOptions::default()).await.unwrap();
    assert_eq!(
        query.sql,
        "SELECT customers.region, COUNT(*) FROM orders INNER JOIN customers ON orders.customer_id = customers.id GROUP BY customers.region"
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_scenario_provider_outage_opens_circuit() {
    let provider = shop_provider();
    let mut settings = test_settings();
    settings.resilience.retry.max_attempts = 1;
    settings.resilience.breaker.failure_threshold = 5;
    let engine = engine_with(&provider, settings).await;
    provider.fail_always(ProviderError::Timeout(Duration::from_secs(1)));

    for _ in 0..5 {
        let err = engine.build(&monthly_revenue(), &BuildOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }
    assert_eq!(engine.provider().circuit_state(), CircuitState::Open);
    assert_eq!(provider.call_count(), 5);

    let err = engine.build(&monthly_revenue(), &BuildOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(provider.call_count(), 5);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_scenario_schema_change_drops_cached_query() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let options = BuildOptions {
        cache_result: true,
        ..BuildOptions::default()
    };
    engine.detector().check_database("shop").await.unwrap();

    let cached = engine.build(&monthly_revenue(), &options).await.unwrap();
    assert!(cached.sql.contains("SUM(revenue)"));
    assert!(engine.cache_stats().size > 0);

    provider.drop_column("shop", "sales", "revenue");
    let changes = engine.detector().check_database("shop").await.unwrap();
    assert_eq!(changes.len(), 1);
    assert!(changes[0].impact.queries >= 1);

    match engine.build(&monthly_revenue(), &options).await {
        Ok(query) => assert!(!query.sql.contains("SUM(revenue)")),
        Err(e) => assert_eq!(e.kind(), ErrorKind::AmbiguousMapping),
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_reload_switches_dialect_for_next_build() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let intent = QueryIntent::new("revenue")
        .aggregate(Aggregation::Sum)
        .group_by("quarterly");

    let mut ansi = test_settings();
    ansi.query.dialect = "ansi".to_string();
    engine.reload(ansi).unwrap();

    let query = engine.build(&intent, &BuildOptions::default()).await.unwrap();
    assert!(query.sql.starts_with("SELECT DATE_TRUNC('quarter', date) AS quarter"));
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_build_respects_caller_timeout() {
    let provider = shop_provider();
    provider.set_latency(Some(Duration::from_secs(2)));
    let engine = engine(&provider).await;
    let options = BuildOptions {
        timeout: Some(Duration::from_millis(500)),
        ..BuildOptions::default()
    };

    let err = engine.build(&monthly_revenue(), &options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    engine.shutdown().await;
}
