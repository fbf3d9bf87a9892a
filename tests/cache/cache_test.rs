// tests/cache/cache_test.rs
#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use schemata::cache::{CacheKey, EntryType, Tag};
use schemata::config::EngineSettings;

use common::{catalog_with, shop_provider, test_settings};

#[tokio::test(start_paused = true)]
async fn test_metadata_expires_after_ttl() {
    let provider = shop_provider();
    let (catalog, _) = catalog_with(&provider, test_settings());

    catalog.table("shop", "sales").await.unwrap();
    catalog.table("shop", "sales").await.unwrap();
    assert_eq!(provider.call_count(), 1);

    tokio::time::advance(Duration::from_secs(301)).await;
    let sales = catalog.table("shop", "sales").await.unwrap();
    assert_eq!(sales.columns.len(), 4);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_tag_invalidation_leaves_other_tables() {
    let provider = shop_provider();
    let (catalog, _) = catalog_with(&provider, test_settings());
    catalog.table("shop", "sales").await.unwrap();
    catalog.table("shop", "orders").await.unwrap();

    let removed = catalog.cache().invalidate(&Tag::schema("sales"));
    assert_eq!(removed, 1);
    assert!(!catalog.cache().contains(&CacheKey::table("shop", "sales")));
    assert!(catalog.cache().contains(&CacheKey::table("shop", "orders")));

    provider.reset_call_count();
    catalog.table("shop", "orders").await.unwrap();
    assert_eq!(provider.call_count(), 0);
    catalog.table("shop", "sales").await.unwrap();
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_database_tag_drops_listing_and_tables() {
    let provider = shop_provider();
    let (catalog, _) = catalog_with(&provider, test_settings());
    catalog.all_tables().await.unwrap();
    let cache = catalog.cache();
    assert!(cache.contains(&CacheKey::tables("shop")));

    let removed = cache.invalidate(&Tag::database("shop"));
    assert_eq!(removed, 5);
    assert!(cache.contains(&CacheKey::databases()));
    assert!(!cache.contains(&CacheKey::tables("shop")));
}

#[tokio::test(start_paused = true)]
async fn test_glob_matches_keys_as_well_as_tags() {
    let provider = shop_provider();
    let (catalog, _) = catalog_with(&provider, test_settings());
    catalog.table("shop", "sales").await.unwrap();
    catalog.table("shop", "customers").await.unwrap();

    assert_eq!(catalog.cache().invalidate("table:shop.s*"), 1);
    assert!(catalog.cache().contains(&CacheKey::table("shop", "customers")));
}

#[tokio::test(start_paused = true)]
async fn test_warm_loads_only_missing_keys() {
    let provider = shop_provider();
    let (catalog, _) = catalog_with(&provider, test_settings());
    catalog.table("shop", "sales").await.unwrap();
    provider.reset_call_count();

    let keys = vec![
        CacheKey::table("shop", "sales"),
        CacheKey::table("shop", "orders"),
        CacheKey::tables("shop"),
        CacheKey::table("shop", "missing"),
    ];
    let stored = catalog.cache().warm(&keys, &catalog).await;

    assert_eq!(stored, 2);
    assert_eq!(provider.call_count(), 3);
    assert_eq!(
        catalog.cache().entry_type(&CacheKey::table("shop", "orders")),
        Some(EntryType::TableMetadata)
    );
    assert_eq!(
        catalog.cache().entry_type(&CacheKey::tables("shop")),
        Some(EntryType::TableList)
    );
}

#[tokio::test(start_paused = true)]
async fn test_capacity_bounds_entries() {
    let provider = shop_provider();
    let mut settings: EngineSettings = test_settings();
    settings.cache.capacity = 2;
    let (catalog, _) = catalog_with(&provider, settings);

    for table in ["sales", "customers", "orders", "suppliers"] {
        catalog.table("shop", table).await.unwrap();
    }

    let stats = catalog.cache().stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.evictions, 2);
    assert!(catalog.cache().contains(&CacheKey::table("shop", "suppliers")));
}
