// tests/mapper/mapper_test.rs
#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemata::cache::{CacheKey, Tag};
use schemata::engine::EngineState;
use schemata::error::{EngineError, ErrorKind};
use schemata::mapper::{AiCandidate, AiError, AiSuggestion, AiSuggestionProvider, MappingContext, MatchMethod};
use schemata::provider::MemoryConnector;

use common::{engine, shop_provider, test_settings};

#[tokio::test]
async fn test_exact_name_resolves_at_full_confidence() {
    let provider = shop_provider();
    let engine = engine(&provider).await;

    let mappings = engine.resolve("revenue", None, None).await.unwrap();
    assert_eq!(mappings[0].path.to_string(), "shop.sales.revenue");
    assert_eq!(mappings[0].confidence, 1.0);
    assert_eq!(mappings[0].method, MatchMethod::Exact);
    assert_eq!(mappings[0].data_type.as_deref(), Some("decimal(12,2)"));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_table_qualified_phrase_picks_that_table() {
    let provider = shop_provider();
    let engine = engine(&provider).await;

    let mappings = engine.resolve("Customer Region", None, None).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].path.to_string(), "shop.customers.region");
    assert_eq!(mappings[0].method, MatchMethod::Exact);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_context_orders_equal_candidates() {
    let provider = shop_provider();
    let engine = engine(&provider).await;

    let open = engine.resolve("region", None, None).await.unwrap();
    assert_eq!(open.len(), 2);
    assert_eq!(open[0].path.to_string(), "shop.customers.region");

    let context = MappingContext::tables(["sales"]);
    let scoped = engine.resolve("region", Some(&context), None).await.unwrap();
    assert_eq!(scoped[0].path.to_string(), "shop.sales.region");
    assert!(scoped[0].context_match);
    assert!(!scoped[1].context_match);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_term_reports_candidates() {
    let provider = shop_provider();
    let engine = engine(&provider).await;

    let err = engine.resolve("turnover", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AmbiguousMapping);
    match err {
        EngineError::AmbiguousMapping { term, floor, .. } => {
            assert_eq!(term, "turnover");
            assert_eq!(floor, 0.5);
        }
        other => panic!("unexpected: {:?}", other),
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_resolution_is_cached_until_feedback() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let cache = engine.catalog().cache();

    engine.resolve("region", None, None).await.unwrap();
    let key = CacheKey::mapping("region", None);
    assert!(cache.contains(&key));
    assert_eq!(cache.keys_with_tag(&Tag::metric("region")), vec![key.clone()]);
    assert!(cache.keys_with_tag(&Tag::schema("customers")).contains(&key));

    engine.learn("region", "shop.sales.region", 1.0).unwrap();
    assert!(!cache.contains(&key));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_feedback_breaks_ties_and_demotes() {
    let provider = shop_provider();
    let engine = engine(&provider).await;

    engine.learn("region", "shop.sales.region", 1.0).unwrap();
    let reinforced = engine.resolve("region", None, None).await.unwrap();
    assert_eq!(reinforced[0].path.to_string(), "shop.sales.region");
    assert_eq!(reinforced[0].usage_count, 1);

    engine.learn("region", "shop.customers.region", 0.0).unwrap();
    let demoted = engine.resolve("region", None, None).await.unwrap();
    assert_eq!(demoted[0].path.to_string(), "shop.sales.region");
    let customers = demoted
        .iter()
        .find(|m| m.path.to_string() == "shop.customers.region")
        .unwrap();
    assert!(customers.confidence < 1.0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_feedback_rejects_out_of_range_quality() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let err = engine.learn("region", "shop.sales.region", 2.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIntent);
    engine.shutdown().await;
}

struct Stalled {
    calls: AtomicUsize,
}

#[async_trait]
impl AiSuggestionProvider for Stalled {
    async fn suggest(&self, _: &str, _: &[AiCandidate]) -> Result<Vec<AiSuggestion>, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(vec![AiSuggestion {
            path: "shop.sales.revenue".into(),
            confidence_hint: 0.95,
            rationale: "too late".into(),
        }])
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_assistant_is_abandoned() {
    let provider = shop_provider();
    let mut settings = test_settings();
    settings.mapper.ai.enabled = true;
    settings.mapper.ai.timeout_ms = 200;
    let ai = Arc::new(Stalled {
        calls: AtomicUsize::new(0),
    });
    let connector = Arc::new(MemoryConnector::new("mem", provider.clone()));
    let engine = EngineState::init(settings, connector, Some(ai.clone())).await.unwrap();

    let err = engine.resolve("turnover", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AmbiguousMapping);
    assert_eq!(ai.calls.load(Ordering::SeqCst), 1);
    engine.shutdown().await;
}
