//! Cache-first access to schema metadata.
//!
//! Every lookup consults the [`SchemaCache`] first and falls back to the
//! provider through the resilience layer, storing what it fetched with the
//! tags the change detector invalidates by.

use std::sync::Arc;

use async_trait::async_trait;

use super::{DatabaseInfo, SchemaObject, TableInfo, TableSchema};
use crate::cache::{CacheKey, CacheLoader, CacheValue, EntryType, KeyKind, LoadedEntry, SchemaCache, Tag};
use crate::config::SettingsHandle;
use crate::error::{EngineError, EngineResult};
use crate::resilience::ResilientProvider;

#[derive(Clone)]
pub struct SchemaCatalog {
    cache: Arc<SchemaCache>,
    provider: Arc<ResilientProvider>,
    settings: SettingsHandle,
}

impl SchemaCatalog {
    pub fn new(cache: Arc<SchemaCache>, provider: Arc<ResilientProvider>, settings: SettingsHandle) -> Self {
        Self {
            cache,
            provider,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    pub fn provider(&self) -> &Arc<ResilientProvider> {
        &self.provider
    }

    /// Databases in scope: the configured list, or everything visible.
    pub async fn databases(&self) -> EngineResult<Vec<DatabaseInfo>> {
        let key = CacheKey::databases();
        if let Some(value) = self.cache.get(&key) {
            if let Some(objects) = value.as_objects() {
                return Ok(objects
                    .iter()
                    .filter_map(|obj| match obj {
                        SchemaObject::Database(db) => Some(db.clone()),
                        _ => None,
                    })
                    .collect());
            }
        }

        let epoch = self.cache.epoch();
        let loaded = self.load(&key).await?;
        let databases = match &loaded.value {
            CacheValue::Objects(objects) => objects
                .iter()
                .filter_map(|obj| match obj {
                    SchemaObject::Database(db) => Some(db.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        self.store(key, loaded, epoch);
        Ok(databases)
    }

    /// Tables of `database`, undescribed.
    pub async fn tables(&self, database: &str) -> EngineResult<Vec<TableInfo>> {
        let key = CacheKey::tables(database);
        let value = match self.cache.get(&key) {
            Some(value) => value.as_ref().clone(),
            None => {
                let epoch = self.cache.epoch();
                let loaded = self.load(&key).await?;
                let value = loaded.value.clone();
                self.store(key, loaded, epoch);
                value
            }
        };

        Ok(value
            .as_objects()
            .unwrap_or_default()
            .iter()
            .filter_map(|obj| match obj {
                SchemaObject::Table(t) => Some(TableInfo {
                    database: t.database.clone(),
                    name: t.name.clone(),
                    row_estimate: t.row_estimate,
                }),
                _ => None,
            })
            .collect())
    }

    /// Full description of one table.
    pub async fn table(&self, database: &str, table: &str) -> EngineResult<TableSchema> {
        let key = CacheKey::table(database, table);
        if let Some(value) = self.cache.get(&key) {
            if let Some(SchemaObject::Table(t)) = value.as_object() {
                return Ok(t.clone());
            }
        }

        let epoch = self.cache.epoch();
        let described = self.provider.describe_table(database, table).await?;
        self.cache.set_if_fresh(
            key,
            CacheValue::Object(SchemaObject::Table(described.clone())),
            EntryType::TableMetadata,
            None,
            table_tags(&described),
            epoch,
        );
        Ok(described)
    }

    /// Every table in every database in scope, described concurrently.
    pub async fn all_tables(&self) -> EngineResult<Vec<TableSchema>> {
        let databases = self.databases().await?;
        let mut out = Vec::new();
        for db in databases {
            let tables = self.tables(&db.name).await?;
            let described =
                futures::future::join_all(tables.iter().map(|t| self.table(&t.database, &t.name)))
                    .await;
            for table in described {
                out.push(table?);
            }
        }
        Ok(out)
    }

    /// Fresh snapshot of `database` from the provider, bypassing the cache.
    /// Empty when the database no longer exists.
    pub async fn snapshot(&self, database: &str) -> EngineResult<Vec<SchemaObject>> {
        let databases = self.provider.discover_databases().await?;
        let Some(info) = databases.into_iter().find(|db| db.name == database) else {
            return Ok(Vec::new());
        };

        let tables = self.provider.discover_tables(database).await?;
        let described = futures::future::join_all(
            tables
                .iter()
                .map(|t| self.provider.describe_table(database, &t.name)),
        )
        .await;

        let mut objects = vec![SchemaObject::Database(info)];
        for table in described {
            objects.extend(SchemaObject::flatten(&table?));
        }
        Ok(objects)
    }

    /// Names of the databases to monitor.
    pub async fn database_names(&self) -> EngineResult<Vec<String>> {
        Ok(self.databases().await?.into_iter().map(|db| db.name).collect())
    }

    async fn load(&self, key: &str) -> EngineResult<LoadedEntry> {
        match CacheKey::parse(key) {
            Some(KeyKind::Databases) => {
                let configured = self.settings.current().provider.databases.clone();
                let mut databases = self.provider.discover_databases().await?;
                if !configured.is_empty() {
                    databases.retain(|db| configured.iter().any(|c| c == &db.name));
                }
                let tags = databases.iter().map(|db| Tag::database(&db.name)).collect();
                Ok(LoadedEntry {
                    value: CacheValue::Objects(databases.into_iter().map(SchemaObject::Database).collect()),
                    entry_type: EntryType::DatabaseList,
                    tags,
                })
            }
            Some(KeyKind::Tables { database }) => {
                let tables = self.provider.discover_tables(&database).await?;
                let shells = tables
                    .into_iter()
                    .map(|t| {
                        let mut shell = TableSchema::new(t.database, t.name);
                        shell.row_estimate = t.row_estimate;
                        SchemaObject::Table(shell)
                    })
                    .collect();
                Ok(LoadedEntry {
                    value: CacheValue::Objects(shells),
                    entry_type: EntryType::TableList,
                    tags: vec![Tag::listing(&database), Tag::database(&database)],
                })
            }
            Some(KeyKind::Table { database, table }) => {
                let described = self.provider.describe_table(&database, &table).await?;
                let tags = table_tags(&described);
                Ok(LoadedEntry {
                    value: CacheValue::Object(SchemaObject::Table(described)),
                    entry_type: EntryType::TableMetadata,
                    tags,
                })
            }
            None => Err(EngineError::UnknownElement(key.to_string())),
        }
    }

    fn store(&self, key: String, loaded: LoadedEntry, epoch: u64) {
        self.cache
            .set_if_fresh(key, loaded.value, loaded.entry_type, None, loaded.tags, epoch);
    }
}

fn table_tags(table: &TableSchema) -> Vec<String> {
    vec![Tag::schema(&table.name), Tag::database(&table.database)]
}

#[async_trait]
impl CacheLoader for SchemaCatalog {
    async fn load(&self, key: &str) -> Option<LoadedEntry> {
        match SchemaCatalog::load(self, key).await {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(key, error = %e, "could not load cache key");
                None
            }
        }
    }
}
