//! Schema change detection.
//!
//! The detector snapshots each monitored database, diffs it against the
//! last stored snapshot and, for every difference:
//!
//! 1. classifies it (severity, cache impact, migration hints)
//! 2. invalidates the cache entries tagged with the affected tables
//! 3. re-warms the configured warm keys
//! 4. persists the new snapshot as the next baseline
//! 5. records it in the bounded history and notifies listeners
//!
//! Checks for one detector are serialized. Per database the detector moves
//! `Idle -> Checking -> Reporting -> Idle`; a check that fails or is
//! cancelled returns to `Idle` without touching the baseline.

mod classify;
mod diff;
mod history;
mod listener;

pub use classify::{Impact, Severity};
pub use diff::{diff, ChangeKind, ObjectDiff};
pub use history::ChangeHistory;
pub use listener::{ListenerError, ListenerId, ListenerRegistry, SchemaChangeListener};

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::Tag;
use crate::config::SettingsHandle;
use crate::error::{EngineError, EngineResult};
use crate::schema::{ElementPath, ObjectKind, SchemaCatalog, SchemaObject};
use crate::store::SchemaStore;

/// A classified schema change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaChange {
    pub id: Uuid,
    pub database: String,
    /// Path after the change; for removals, the path that disappeared.
    pub path: ElementPath,
    pub object_kind: ObjectKind,
    pub kind: ChangeKind,
    pub severity: Severity,
    pub before: Option<SchemaObject>,
    pub after: Option<SchemaObject>,
    pub detected_at: DateTime<Utc>,
    pub impact: Impact,
    pub migration: Vec<String>,
}

impl std::fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} {} {}", self.severity, self.object_kind, self.path, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorState {
    #[default]
    Idle,
    Checking,
    Reporting,
}

pub struct SchemaChangeDetector {
    catalog: SchemaCatalog,
    store: Option<Arc<SchemaStore>>,
    settings: SettingsHandle,
    listeners: ListenerRegistry,
    history: Mutex<ChangeHistory>,
    baselines: Mutex<HashMap<String, Vec<SchemaObject>>>,
    states: Mutex<HashMap<String, DetectorState>>,
    running: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SchemaChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaChangeDetector")
            .field("store", &self.store.is_some())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl SchemaChangeDetector {
    pub fn new(catalog: SchemaCatalog, store: Option<Arc<SchemaStore>>, settings: SettingsHandle) -> Self {
        Self {
            catalog,
            store,
            settings,
            listeners: ListenerRegistry::default(),
            history: Mutex::new(ChangeHistory::default()),
            baselines: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn SchemaChangeListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    pub fn state(&self, database: &str) -> DetectorState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(database)
            .copied()
            .unwrap_or_default()
    }

    /// Changes detected at or after `since` with at least `min_severity`.
    pub fn history(&self, since: Option<DateTime<Utc>>, min_severity: Option<Severity>) -> Vec<SchemaChange> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .query(since, min_severity)
    }

    /// Changes at `path` or anywhere below it.
    pub fn changes_for(&self, path: &ElementPath) -> Vec<SchemaChange> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .for_path(path)
    }

    /// Check every monitored database. A failing database is logged and
    /// skipped; only failing to list databases is an error.
    pub async fn check_all(&self) -> EngineResult<Vec<SchemaChange>> {
        let mut databases: BTreeSet<String> = self.catalog.database_names().await?.into_iter().collect();
        // Databases that vanished from the listing still need their removal reported.
        databases.extend(
            self.baselines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(_, objects)| !objects.is_empty())
                .map(|(name, _)| name.clone()),
        );
        let mut changes = Vec::new();
        for database in databases {
            match self.check_database(&database).await {
                Ok(found) => changes.extend(found),
                Err(e) => tracing::warn!(database = %database, error = %e, "schema check failed"),
            }
        }
        Ok(changes)
    }

    /// Snapshot `database` and report what changed since the last check.
    ///
    /// The first check of a database without a stored snapshot only records
    /// the baseline.
    pub async fn check_database(&self, database: &str) -> EngineResult<Vec<SchemaChange>> {
        let _running = self.running.lock().await;
        let state = StateGuard::enter(&self.states, database);

        let current = self.catalog.snapshot(database).await?;
        let Some(baseline) = self.baseline(database)? else {
            if current.is_empty() {
                return Err(EngineError::UnknownElement(database.to_string()));
            }
            self.remember(database, current, Utc::now())?;
            tracing::info!(database, "schema baseline captured");
            return Ok(Vec::new());
        };

        let diffs = diff(&baseline, &current);
        if diffs.is_empty() {
            tracing::debug!(database, "no schema changes");
            return Ok(Vec::new());
        }
        state.set(DetectorState::Reporting);

        let detected_at = Utc::now();
        let cache = self.catalog.cache();
        let changes: Vec<SchemaChange> = diffs
            .into_iter()
            .map(|d| SchemaChange {
                id: Uuid::new_v4(),
                database: database.to_string(),
                path: d.path(),
                object_kind: d.object_kind,
                kind: d.kind,
                severity: classify::severity(&d),
                impact: classify::impact(cache, &d, database),
                migration: classify::migration(&d),
                before: d.before,
                after: d.after,
                detected_at,
            })
            .collect();

        let invalidated = self.invalidate(database, &changes);
        self.remember(database, current, detected_at)?;

        let settings = self.settings.current();
        let warmed = if settings.cache.warm_keys.is_empty() {
            0
        } else {
            cache.warm(&settings.cache.warm_keys, &self.catalog).await
        };

        let retention = chrono::Duration::hours(settings.detector.history_retention_hours as i64);
        let listener_timeout = Duration::from_millis(settings.detector.listener_timeout_ms);
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            for change in &changes {
                history.push(change.clone(), settings.detector.history_capacity, retention);
            }
        }
        for change in &changes {
            tracing::info!(
                database,
                path = %change.path,
                kind = %change.kind,
                severity = %change.severity,
                impact = %change.impact.summary(),
                "schema change detected"
            );
            self.listeners.dispatch(change, listener_timeout);
        }
        tracing::info!(
            database,
            changes = changes.len(),
            invalidated,
            warmed,
            "schema check complete"
        );
        Ok(changes)
    }

    /// Poll all databases every `poll_interval_seconds` until `token` is cancelled.
    pub fn spawn(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let detector = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let settings = detector.settings.current();
                let interval = Duration::from_secs(settings.detector.poll_interval_seconds.max(1));
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if !detector.settings.current().detector.enabled {
                            continue;
                        }
                        tokio::select! {
                            _ = token.cancelled() => break,
                            result = detector.check_all() => {
                                if let Err(e) = result {
                                    tracing::warn!(error = %e, "schema poll failed");
                                }
                            }
                        }
                    }
                }
            }
            tracing::debug!("schema change detector stopped");
        })
    }

    fn baseline(&self, database: &str) -> EngineResult<Option<Vec<SchemaObject>>> {
        if let Some(objects) = self
            .baselines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(database)
        {
            return Ok(Some(objects.clone()));
        }
        match &self.store {
            Some(store) => Ok(store.load_snapshot(database)?.map(|s| s.objects)),
            None => Ok(None),
        }
    }

    fn remember(&self, database: &str, objects: Vec<SchemaObject>, at: DateTime<Utc>) -> EngineResult<()> {
        if let Some(store) = &self.store {
            store.save_snapshot(database, &objects, at)?;
        }
        self.baselines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(database.to_string(), objects);
        Ok(())
    }

    /// Drop every cache entry that may describe a changed object.
    fn invalidate(&self, database: &str, changes: &[SchemaChange]) -> usize {
        let mut tags: BTreeSet<String> = BTreeSet::new();
        for change in changes {
            if change.object_kind == ObjectKind::Database {
                tags.insert(Tag::database(database));
            }
            for obj in change.before.iter().chain(change.after.iter()) {
                if let Some(table) = obj.table_name() {
                    tags.insert(Tag::schema(table));
                }
            }
            if change.object_kind == ObjectKind::Table {
                tags.insert(Tag::listing(database));
            }
            // New names may now be the best match for terms mapped elsewhere.
            if matches!(change.kind, ChangeKind::Added | ChangeKind::Renamed) {
                tags.insert("mapping:*".to_string());
            }
        }

        let cache = self.catalog.cache();
        tags.iter().map(|tag| cache.invalidate(tag)).sum()
    }
}

/// Marks a database `Checking` and resets it to `Idle` when dropped.
struct StateGuard<'a> {
    states: &'a Mutex<HashMap<String, DetectorState>>,
    database: String,
}

impl<'a> StateGuard<'a> {
    fn enter(states: &'a Mutex<HashMap<String, DetectorState>>, database: &str) -> Self {
        let guard = Self {
            states,
            database: database.to_string(),
        };
        guard.set(DetectorState::Checking);
        guard
    }

    fn set(&self, state: DetectorState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.database.clone(), state);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.set(DetectorState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, CacheValue, EntryType, SchemaCache};
    use crate::config::EngineSettings;
    use crate::provider::{MemoryConnector, MemoryProvider};
    use crate::resilience::ResilientProvider;
    use crate::schema::{ColumnSchema, TableSchema};

    fn setup() -> (Arc<SchemaChangeDetector>, Arc<MemoryProvider>, Arc<SchemaStore>) {
        let provider = Arc::new(MemoryProvider::with_tables([TableSchema::new("shop", "sales")
            .column(ColumnSchema::new("id", "int").primary_key())
            .column(ColumnSchema::new("date", "date"))
            .column(ColumnSchema::new("revenue", "decimal(12,2)"))]));
        let settings = SettingsHandle::new(EngineSettings::default()).unwrap();
        let connector = Arc::new(MemoryConnector::new("mem", provider.clone()));
        let resilient = Arc::new(ResilientProvider::new(connector, settings.clone()));
        let cache = Arc::new(SchemaCache::new(settings.clone()));
        let catalog = SchemaCatalog::new(cache, resilient, settings.clone());
        let store = Arc::new(SchemaStore::open_in_memory().unwrap());
        let detector = Arc::new(SchemaChangeDetector::new(catalog, Some(store.clone()), settings));
        (detector, provider, store)
    }

    #[tokio::test]
    async fn test_first_check_records_baseline() {
        let (detector, _, store) = setup();
        assert!(detector.check_database("shop").await.unwrap().is_empty());
        assert!(store.load_snapshot("shop").unwrap().is_some());
        assert_eq!(detector.state("shop"), DetectorState::Idle);
    }

    #[tokio::test]
    async fn test_vanished_database_is_reported_as_critical() {
        let (detector, provider, _) = setup();
        detector.check_database("shop").await.unwrap();
        assert_eq!(detector.catalog.database_names().await.unwrap(), vec!["shop".to_string()]);

        provider.drop_database("shop");
        let changes = detector.check_all().await.unwrap();

        let database = changes
            .iter()
            .find(|c| c.object_kind == ObjectKind::Database)
            .unwrap();
        assert_eq!(database.kind, ChangeKind::Removed);
        assert_eq!(database.severity, Severity::Critical);
        assert!(detector.catalog.cache().keys_with_tag(&Tag::database("shop")).is_empty());
        assert!(detector.catalog.database_names().await.unwrap().is_empty());

        // Reported once; the empty snapshot is the new baseline.
        assert!(detector.check_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_database_without_baseline_is_rejected() {
        let (detector, _, _) = setup();
        let err = detector.check_database("nope").await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownElement(_)));
    }

    #[tokio::test]
    async fn test_dropped_column_is_high_and_invalidates() {
        let (detector, provider, _) = setup();
        detector.check_database("shop").await.unwrap();

        let cache = detector.catalog.cache();
        cache.set(
            CacheKey::mapping("revenue", None),
            CacheValue::Mappings(Vec::new()),
            EntryType::SemanticMapping,
            None,
            vec![Tag::schema("sales"), Tag::metric("revenue")],
        );
        detector.catalog.table("shop", "sales").await.unwrap();
        assert_eq!(cache.keys_with_tag(&Tag::schema("sales")).len(), 2);

        provider.drop_column("shop", "sales", "revenue");
        let changes = detector.check_database("shop").await.unwrap();

        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.kind, ChangeKind::Removed);
        assert_eq!(change.severity, Severity::High);
        assert_eq!(change.path.to_string(), "shop.sales.revenue");
        assert_eq!(change.impact.mappings, 1);
        assert_eq!(change.impact.metadata, 1);
        assert!(cache.keys_with_tag(&Tag::schema("sales")).is_empty());

        assert_eq!(detector.history(None, Some(Severity::High)).len(), 1);
        assert_eq!(detector.changes_for(&ElementPath::table("shop", "sales")).len(), 1);

        // The new snapshot is the next baseline.
        assert!(detector.check_database("shop").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_baseline_survives_restart_through_store() {
        let (detector, provider, store) = setup();
        detector.check_database("shop").await.unwrap();

        let restarted = SchemaChangeDetector::new(
            detector.catalog.clone(),
            Some(store),
            detector.settings.clone(),
        );
        provider.add_column("shop", "sales", ColumnSchema::new("channel", "varchar(16)"));
        let changes = restarted.check_database("shop").await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Added);
        assert_eq!(changes[0].severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_failed_check_keeps_baseline() {
        let (detector, provider, _) = setup();
        detector.check_database("shop").await.unwrap();

        provider.drop_column("shop", "sales", "revenue");
        provider.fail_always(crate::provider::ProviderError::NotFound("shop".into()));
        assert!(detector.check_database("shop").await.is_err());
        assert_eq!(detector.state("shop"), DetectorState::Idle);

        provider.clear_faults();
        assert_eq!(detector.check_database("shop").await.unwrap().len(), 1);
    }
}
