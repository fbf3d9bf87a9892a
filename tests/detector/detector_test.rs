// tests/detector/detector_test.rs
#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemata::cache::{CacheKey, Tag};
use schemata::detector::{ChangeKind, ListenerError, SchemaChange, SchemaChangeListener, Severity};
use schemata::error::ErrorKind;
use schemata::provider::{MemoryProvider, ProviderConnector, ProviderResult, SchemaProvider};
use schemata::schema::{ColumnSchema, DatabaseInfo, ElementPath, ObjectKind, QueryResult, TableInfo, TableSchema};
use tokio::sync::{mpsc, Notify};

use common::{engine, engine_with, shop_provider, test_settings};

struct Forward(mpsc::UnboundedSender<SchemaChange>);

#[async_trait]
impl SchemaChangeListener for Forward {
    async fn on_schema_change(&self, change: &SchemaChange) -> Result<(), ListenerError> {
        self.0
            .send(change.clone())
            .map_err(|e| ListenerError(e.to_string()))
    }
}

struct Broken;

#[async_trait]
impl SchemaChangeListener for Broken {
    async fn on_schema_change(&self, _: &SchemaChange) -> Result<(), ListenerError> {
        Err(ListenerError("downstream unavailable".into()))
    }
}

/// Delegates to a [`MemoryProvider`]; when armed, the next `describe_table`
/// reads its answer, then waits for `release` before replying.
struct HeldReply {
    inner: Arc<MemoryProvider>,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl SchemaProvider for HeldReply {
    async fn discover_databases(&self) -> ProviderResult<Vec<DatabaseInfo>> {
        self.inner.discover_databases().await
    }

    async fn discover_tables(&self, database: &str) -> ProviderResult<Vec<TableInfo>> {
        self.inner.discover_tables(database).await
    }

    async fn describe_table(&self, database: &str, table: &str) -> ProviderResult<TableSchema> {
        let answer = self.inner.describe_table(database, table).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        answer
    }

    async fn execute_query(&self, sql: &str, timeout: Duration) -> ProviderResult<QueryResult> {
        self.inner.execute_query(sql, timeout).await
    }

    async fn health_check(&self) -> bool {
        true
    }
}

struct HeldConnector(Arc<HeldReply>);

#[async_trait]
impl ProviderConnector for HeldConnector {
    fn endpoint(&self) -> &str {
        "held"
    }

    async fn connect(&self) -> ProviderResult<Arc<dyn SchemaProvider>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_lookup_straddling_a_change_does_not_recache_old_metadata() {
    let provider = shop_provider();
    let held = Arc::new(HeldReply {
        inner: provider.clone(),
        armed: AtomicBool::new(false),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let engine = schemata::EngineState::init(test_settings(), Arc::new(HeldConnector(held.clone())), None)
        .await
        .unwrap();
    engine.detector().check_database("shop").await.unwrap();

    held.armed.store(true, Ordering::SeqCst);
    let catalog = engine.catalog().clone();
    let reader = tokio::spawn(async move { catalog.table("shop", "sales").await });
    held.entered.notified().await;

    provider.drop_column("shop", "sales", "revenue");
    assert_eq!(engine.detector().check_database("shop").await.unwrap().len(), 1);

    held.release.notify_one();
    let old = reader.await.unwrap().unwrap();
    assert!(old.find_column("revenue").is_some());

    let fresh = engine.catalog().table("shop", "sales").await.unwrap();
    assert!(fresh.find_column("revenue").is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_dropped_column_invalidates_mappings_and_notifies() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.detector().add_listener(Arc::new(Broken));
    engine.detector().add_listener(Arc::new(Forward(tx)));

    assert!(engine.detector().check_database("shop").await.unwrap().is_empty());
    engine.resolve("revenue", None, None).await.unwrap();
    let cache = engine.catalog().cache();
    assert!(cache.contains(&CacheKey::mapping("revenue", None)));

    provider.drop_column("shop", "sales", "revenue");
    let changes = engine.detector().check_database("shop").await.unwrap();

    assert_eq!(changes.len(), 1);
    let change = &changes[0];
    assert_eq!(change.kind, ChangeKind::Removed);
    assert_eq!(change.object_kind, ObjectKind::Column);
    assert_eq!(change.severity, Severity::High);
    assert_eq!(change.path, ElementPath::column("shop", "sales", "revenue"));
    assert_eq!(change.impact.mappings, 1);
    assert!(!cache.contains(&CacheKey::mapping("revenue", None)));
    assert!(cache.keys_with_tag(&Tag::schema("sales")).is_empty());

    let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.id, change.id);

    match engine.resolve("revenue", None, None).await {
        Ok(mappings) => assert!(mappings.iter().all(|m| m.path != change.path)),
        Err(e) => assert_eq!(e.kind(), ErrorKind::AmbiguousMapping),
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_history_filters_by_severity_and_path() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let detector = engine.detector();
    detector.check_database("shop").await.unwrap();

    provider.drop_column("shop", "sales", "revenue");
    provider.add_column("shop", "sales", ColumnSchema::new("channel", "varchar(16)"));
    provider.retype_column("shop", "orders", "amount", "decimal(14,2)");
    let changes = detector.check_database("shop").await.unwrap();
    assert_eq!(changes.len(), 3);

    assert_eq!(detector.history(None, None).len(), 3);
    let serious = detector.history(None, Some(Severity::High));
    assert_eq!(serious.len(), 1);
    assert_eq!(serious[0].path.to_string(), "shop.sales.revenue");

    let on_sales = detector.changes_for(&ElementPath::table("shop", "sales"));
    assert_eq!(on_sales.len(), 2);
    let retyped = detector.changes_for(&ElementPath::column("shop", "orders", "amount"));
    assert_eq!(retyped.len(), 1);
    assert_eq!(retyped[0].kind, ChangeKind::Retyped);
    assert_eq!(retyped[0].severity, Severity::Medium);

    assert!(detector.check_database("shop").await.unwrap().is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_renamed_table_refreshes_listing() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    engine.detector().check_database("shop").await.unwrap();
    engine.catalog().tables("shop").await.unwrap();

    provider.remove_table("shop", "suppliers");
    provider.put_table(
        TableSchema::new("shop", "vendors")
            .column(ColumnSchema::new("id", "int").primary_key())
            .column(ColumnSchema::new("company", "varchar(64)")),
    );
    let changes = engine.detector().check_database("shop").await.unwrap();

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Renamed);
    assert_eq!(changes[0].severity, Severity::High);
    assert_eq!(changes[0].path, ElementPath::table("shop", "vendors"));

    let names: Vec<String> = engine
        .catalog()
        .tables("shop")
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert!(names.contains(&"vendors".to_string()));
    assert!(!names.contains(&"suppliers".to_string()));
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_poll_loop_reports_changes() {
    let provider = shop_provider();
    let mut settings = test_settings();
    settings.detector.enabled = true;
    settings.detector.poll_interval_seconds = 1;
    let engine = engine_with(&provider, settings).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.detector().add_listener(Arc::new(Forward(tx)));

    engine.detector().check_database("shop").await.unwrap();
    provider.add_column("shop", "orders", ColumnSchema::new("shipped_at", "datetime").not_null());

    let change = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.kind, ChangeKind::Added);
    assert_eq!(change.path.to_string(), "shop.orders.shipped_at");
    assert_eq!(change.severity, Severity::Medium);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_removed_listener_hears_nothing() {
    let provider = shop_provider();
    let engine = engine(&provider).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = engine.detector().add_listener(Arc::new(Forward(tx)));
    assert!(engine.detector().remove_listener(id));
    assert!(!engine.detector().remove_listener(id));

    engine.detector().check_database("shop").await.unwrap();
    provider.drop_column("shop", "customers", "name");
    assert_eq!(engine.detector().check_database("shop").await.unwrap().len(), 1);

    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());
    engine.shutdown().await;
}
