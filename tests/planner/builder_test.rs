// tests/planner/builder_test.rs
#[path = "../common/mod.rs"]
mod common;

use schemata::engine::BuildOptions;
use schemata::error::{EngineError, ErrorKind};
use schemata::mapper::MappingContext;
use schemata::planner::{Aggregation, QueryIntent};
use schemata::provider::ProviderError;
use schemata::sql::SortDir;

use common::{engine, engine_with, shop_provider, test_settings};

#[tokio::test]
async fn test_monthly_revenue_validated_on_provider() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let intent = QueryIntent::new("revenue")
        .aggregate(Aggregation::Sum)
        .group_by("month")
        .filter("year", 2024);

    let query = engine.build(&intent, &BuildOptions::default()).await.unwrap();
    insta::assert_snapshot!(query.sql, @"SELECT DATE_FORMAT(date, '%Y-%m') AS month, SUM(revenue) FROM sales WHERE YEAR(date) = 2024 GROUP BY month");
    assert_eq!(query.confidence, 1.0);
    assert!(query.joins.is_empty());
    assert_eq!(query.mappings.len(), 1);
    assert_eq!(
        provider.executed_queries(),
        vec![format!("EXPLAIN {}", query.sql)]
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_ansi_dialect_truncates_dates() {
    let provider = shop_provider();
    let mut settings = test_settings();
    settings.query.dialect = "ansi".to_string();
    let engine = engine_with(&provider, settings).await;
    let intent = QueryIntent::new("revenue")
        .aggregate(Aggregation::Sum)
        .group_by("quarterly");

    let query = engine.build(&intent, &BuildOptions::default()).await.unwrap();
    insta::assert_snapshot!(query.sql, @"SELECT DATE_TRUNC('quarter', date) AS quarter, SUM(revenue) FROM sales GROUP BY DATE_TRUNC('quarter', date)");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_count_by_customer_region_joins_on_foreign_key() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let intent = QueryIntent::new("orders")
        .aggregate(Aggregation::Count)
        .group_by("customer region");

    let query = engine.build(&intent, &BuildOptions::default()).await.unwrap();
    insta::assert_snapshot!(query.sql, @"SELECT customers.region, COUNT(*) FROM orders INNER JOIN customers ON orders.customer_id = customers.id GROUP BY customers.region");
    assert_eq!(query.joins.len(), 1);
    assert_eq!(query.joins[0].left_table, "orders");
    assert_eq!(query.joins[0].right_table, "customers");
    assert_eq!(query.tables(), vec!["orders", "customers"]);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_unrelated_tables_are_not_cross_joined() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let intent = QueryIntent::new("revenue")
        .aggregate(Aggregation::Sum)
        .group_by("company");

    let err = engine.build(&intent, &BuildOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoJoinPath);
    assert!(provider.executed_queries().is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_tied_grouping_column_resolves_to_metric_table() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let region = engine.resolve("region", None, None).await.unwrap();
    assert_eq!(region.len(), 2);
    assert!(region.iter().all(|m| m.confidence == 1.0));

    let intent = QueryIntent::new("revenue")
        .aggregate(Aggregation::Sum)
        .group_by("region");
    let query = engine.build(&intent, &BuildOptions::default()).await.unwrap();
    insta::assert_snapshot!(query.sql, @"SELECT region, SUM(revenue) FROM sales GROUP BY region");
    assert!(query.joins.is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_context_picks_grouping_column() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let intent = QueryIntent::new("revenue")
        .aggregate(Aggregation::Sum)
        .group_by("region")
        .filter_in("region", ["EU", "US"])
        .order_by("revenue", SortDir::Desc)
        .limit(5);
    let options = BuildOptions {
        context: Some(MappingContext::tables(["sales"])),
        ..BuildOptions::default()
    };

    let query = engine.build(&intent, &options).await.unwrap();
    insta::assert_snapshot!(query.sql, @"SELECT region, SUM(revenue) FROM sales WHERE region IN ('EU', 'US') GROUP BY region ORDER BY SUM(revenue) DESC LIMIT 5");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_filter_value_cannot_escape_string_literal() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let intent = QueryIntent::new("amount")
        .aggregate(Aggregation::Sum)
        .filter("status", "x\\' OR 1=1 -- ");

    let query = engine.build(&intent, &BuildOptions::default()).await.unwrap();
    insta::assert_snapshot!(query.sql, @r"SELECT SUM(amount) FROM orders WHERE status = 'x\\'' OR 1=1 -- '");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_grouping_without_aggregation_is_rejected() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let intent = QueryIntent::new("revenue").group_by("month");

    let err = engine.build(&intent, &BuildOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIntent);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_provider_rejection_surfaces_verbatim() {
    let provider = shop_provider();
    provider.reject_queries_containing("SUM(revenue)", ProviderError::rejected("1142", "SELECT command denied"));
    let engine = engine(&provider).await;
    let intent = QueryIntent::new("revenue").aggregate(Aggregation::Sum);

    let err = engine.build(&intent, &BuildOptions::default()).await.unwrap_err();
    match err {
        EngineError::Validation { code, message, .. } => {
            assert_eq!(code.as_deref(), Some("1142"));
            assert_eq!(message, "SELECT command denied");
        }
        other => panic!("unexpected: {:?}", other),
    }

    let unchecked = BuildOptions {
        validate: false,
        ..BuildOptions::default()
    };
    let query = engine.build(&intent, &unchecked).await.unwrap();
    assert_eq!(query.sql, "SELECT SUM(revenue) FROM sales");
    engine.shutdown().await;
}
