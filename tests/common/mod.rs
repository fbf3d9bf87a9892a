// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;

use schemata::cache::SchemaCache;
use schemata::config::{EngineSettings, SettingsHandle};
use schemata::engine::EngineState;
use schemata::provider::{MemoryConnector, MemoryProvider};
use schemata::resilience::ResilientProvider;
use schemata::schema::{ColumnSchema, SchemaCatalog, TableSchema};

/// sales, customers, orders (FK to customers) and an unrelated suppliers table.
pub fn shop_tables() -> Vec<TableSchema> {
    vec![
        TableSchema::new("shop", "sales")
            .column(ColumnSchema::new("id", "int").primary_key())
            .column(ColumnSchema::new("date", "date"))
            .column(ColumnSchema::new("region", "varchar(16)"))
            .column(ColumnSchema::new("revenue", "decimal(12,2)"))
            .with_rows(50_000),
        TableSchema::new("shop", "customers")
            .column(ColumnSchema::new("id", "int").primary_key())
            .column(ColumnSchema::new("name", "varchar(64)"))
            .column(ColumnSchema::new("region", "varchar(32)")),
        TableSchema::new("shop", "orders")
            .column(ColumnSchema::new("id", "int").primary_key())
            .column(ColumnSchema::new("customer_id", "int"))
            .column(ColumnSchema::new("amount", "decimal(10,2)"))
            .column(ColumnSchema::new("status", "varchar(16)"))
            .foreign_key("customer_id", "customers", "id")
            .index("idx_orders_customer", &["customer_id"], false),
        TableSchema::new("shop", "suppliers")
            .column(ColumnSchema::new("id", "int").primary_key())
            .column(ColumnSchema::new("company", "varchar(64)")),
    ]
}

pub fn shop_provider() -> Arc<MemoryProvider> {
    Arc::new(MemoryProvider::with_tables(shop_tables()))
}

/// Defaults with an in-memory store, no retry jitter and the poll loop off.
pub fn test_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.store.in_memory = true;
    settings.detector.enabled = false;
    settings.resilience.retry.jitter = 0.0;
    settings
}

pub fn resilient(provider: &Arc<MemoryProvider>, settings: &SettingsHandle) -> Arc<ResilientProvider> {
    let connector = Arc::new(MemoryConnector::new("mem", provider.clone()));
    Arc::new(ResilientProvider::new(connector, settings.clone()))
}

pub fn catalog_with(provider: &Arc<MemoryProvider>, settings: EngineSettings) -> (SchemaCatalog, SettingsHandle) {
    let handle = SettingsHandle::new(settings).expect("valid settings");
    let cache = Arc::new(SchemaCache::new(handle.clone()));
    let catalog = SchemaCatalog::new(cache, resilient(provider, &handle), handle.clone());
    (catalog, handle)
}

pub async fn engine_with(provider: &Arc<MemoryProvider>, settings: EngineSettings) -> EngineState {
    let connector = Arc::new(MemoryConnector::new("mem", provider.clone()));
    EngineState::init(settings, connector, None)
        .await
        .expect("engine starts")
}

pub async fn engine(provider: &Arc<MemoryProvider>) -> EngineState {
    engine_with(provider, test_settings()).await
}
