//! Cache entry types and stored values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::CacheSettings;
use crate::mapper::SemanticMapping;
use crate::planner::GeneratedQuery;
use crate::schema::{QueryResult, SchemaObject};

/// What an entry holds; selects its default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    DatabaseList,
    TableList,
    /// A described table, columns and indexes included.
    TableMetadata,
    SemanticMapping,
    QueryResult,
}

impl EntryType {
    pub fn default_ttl(self, settings: &CacheSettings) -> Duration {
        let seconds = match self {
            EntryType::DatabaseList | EntryType::TableList | EntryType::TableMetadata => {
                settings.metadata_ttl_seconds
            }
            EntryType::SemanticMapping => settings.mapping_ttl_seconds,
            EntryType::QueryResult => settings.query_result_ttl_seconds,
        };
        Duration::from_secs(seconds)
    }
}

/// A cached value. Values are immutable once stored; `set` replaces the
/// whole `Arc`, so readers see either the old or the new value.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Object(SchemaObject),
    Objects(Vec<SchemaObject>),
    Mappings(Vec<SemanticMapping>),
    Query(Box<GeneratedQuery>),
    Rows(QueryResult),
}

impl CacheValue {
    pub fn as_object(&self) -> Option<&SchemaObject> {
        match self {
            CacheValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_objects(&self) -> Option<&[SchemaObject]> {
        match self {
            CacheValue::Objects(objs) => Some(objs),
            _ => None,
        }
    }

    pub fn as_mappings(&self) -> Option<&[SemanticMapping]> {
        match self {
            CacheValue::Mappings(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_query(&self) -> Option<&GeneratedQuery> {
        match self {
            CacheValue::Query(q) => Some(q),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Score {
    value: f64,
    at: Instant,
}

/// One stored entry.
#[derive(Debug)]
pub(super) struct CacheEntry {
    pub entry_type: EntryType,
    pub value: Arc<CacheValue>,
    pub created: Instant,
    pub expires: Instant,
    pub tags: Vec<String>,
    access_count: AtomicU64,
    score: Mutex<Score>,
}

impl CacheEntry {
    pub fn new(entry_type: EntryType, value: CacheValue, ttl: Duration, tags: Vec<String>, now: Instant) -> Self {
        Self {
            entry_type,
            value: Arc::new(value),
            created: now,
            expires: now + ttl,
            tags,
            access_count: AtomicU64::new(0),
            score: Mutex::new(Score { value: 1.0, at: now }),
        }
    }

    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires
    }

    /// Record an access: decay the score to `now`, then add one.
    pub fn touch(&self, now: Instant, half_life: Duration) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        let mut score = self.score.lock().unwrap_or_else(PoisonError::into_inner);
        score.value = decayed(score.value, score.at, now, half_life) + 1.0;
        score.at = now;
    }

    /// Recency-weighted access frequency as of `now`.
    pub fn score(&self, now: Instant, half_life: Duration) -> f64 {
        let score = self.score.lock().unwrap_or_else(PoisonError::into_inner);
        decayed(score.value, score.at, now, half_life)
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn last_access(&self) -> Instant {
        self.score.lock().unwrap_or_else(PoisonError::into_inner).at
    }
}

fn decayed(value: f64, at: Instant, now: Instant, half_life: Duration) -> f64 {
    let elapsed = now.saturating_duration_since(at).as_secs_f64();
    let half_life = half_life.as_secs_f64().max(f64::EPSILON);
    value * 0.5f64.powf(elapsed / half_life)
}
