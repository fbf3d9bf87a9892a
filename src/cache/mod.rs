//! In-memory schema cache.
//!
//! Holds schema objects, business-term mappings and generated queries, each
//! with a TTL chosen by entry type and a set of invalidation tags.
//!
//! # Design
//!
//! - One `RwLock` over the entry map and the tag index; `get` takes the read
//!   lock only, access bookkeeping lives in per-entry atomics
//! - Values are stored behind `Arc` and replaced whole, so a `get` racing a
//!   `set` or `invalidate` sees the old or the new value
//! - Over capacity, expired entries go first, then the entry with the lowest
//!   recency-weighted access score (decayed lazily, on access or eviction)
//! - TTLs, capacity and half-life are read from the live settings per call
//! - Every `invalidate` advances an epoch; a loader that captured the epoch
//!   before its provider round trip stores through [`SchemaCache::set_if_fresh`],
//!   which drops the write if one of its tags was invalidated in between
//!
//! See [`keys`] for key and tag formats.

mod entry;
pub mod keys;
mod stats;

pub use entry::{CacheValue, EntryType};
pub use keys::{compute_hash, CacheKey, KeyKind, Tag};
pub use stats::{CacheStats, KeyScore};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::SettingsHandle;
use entry::CacheEntry;
use stats::Counters;

const STATS_TOP_N: usize = 5;
/// Invalidation records kept for freshness checks before the log is folded
/// into the epoch floor.
const MAX_TRACKED_INVALIDATIONS: usize = 4096;

/// A value produced by a [`CacheLoader`] for warming.
#[derive(Debug, Clone)]
pub struct LoadedEntry {
    pub value: CacheValue,
    pub entry_type: EntryType,
    pub tags: Vec<String>,
}

/// Source of values for [`SchemaCache::warm`].
#[async_trait]
pub trait CacheLoader: Send + Sync {
    /// Produce the value for `key`, or `None` if it cannot be loaded.
    async fn load(&self, key: &str) -> Option<LoadedEntry>;
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    tags: HashMap<String, HashSet<String>>,
    epoch: u64,
    /// Writes observed before this epoch are stale.
    floor: u64,
    /// Last epoch at which an exact tag or key was invalidated.
    invalidated: HashMap<String, u64>,
    /// Glob invalidations with the epoch they ran at.
    patterns: Vec<(u64, regex::Regex)>,
}

impl CacheState {
    fn record_invalidation(&mut self, exact: Option<&str>, pattern: Option<regex::Regex>) {
        self.epoch += 1;
        let epoch = self.epoch;
        if let Some(tag) = exact {
            self.invalidated.insert(tag.to_string(), epoch);
        }
        if let Some(re) = pattern {
            self.patterns.push((epoch, re));
        }
        if self.invalidated.len() + self.patterns.len() > MAX_TRACKED_INVALIDATIONS {
            self.invalidated.clear();
            self.patterns.clear();
            self.floor = epoch;
        }
    }

    /// True when an invalidation after `observed` covers `key` or one of `tags`.
    fn is_stale(&self, observed: u64, key: &str, tags: &[String]) -> bool {
        if observed < self.floor {
            return true;
        }
        let names = || std::iter::once(key).chain(tags.iter().map(String::as_str));
        names().any(|name| self.invalidated.get(name).is_some_and(|&at| at > observed))
            || self
                .patterns
                .iter()
                .filter(|(at, _)| *at > observed)
                .any(|(_, re)| names().any(|name| re.is_match(name)))
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        Some(entry)
    }
}

/// Typed TTL cache with frequency-aware eviction and tag invalidation.
#[derive(Debug)]
pub struct SchemaCache {
    state: RwLock<CacheState>,
    counters: Counters,
    settings: SettingsHandle,
}

impl SchemaCache {
    pub fn new(settings: SettingsHandle) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            counters: Counters::default(),
            settings,
        }
    }

    /// Look up a live entry.
    pub fn get(&self, key: &str) -> Option<Arc<CacheValue>> {
        let now = Instant::now();
        let state = self.read();
        match state.entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                entry.touch(now, self.half_life());
                self.counters.hit();
                Some(entry.value.clone())
            }
            _ => {
                self.counters.miss();
                None
            }
        }
    }

    /// True when `key` holds a live entry. Does not count as an access.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.read()
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Store `value` under `key`, replacing any previous entry.
    ///
    /// `ttl` of `None` uses the default for `entry_type`.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: CacheValue,
        entry_type: EntryType,
        ttl: Option<Duration>,
        tags: Vec<String>,
    ) {
        let mut state = self.write();
        self.insert(&mut state, key.into(), value, entry_type, ttl, tags);
    }

    /// Current invalidation epoch. Capture it before fetching a value that
    /// will be stored with [`SchemaCache::set_if_fresh`].
    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Like [`SchemaCache::set`], unless `key` or one of `tags` was
    /// invalidated after `observed_epoch`. Returns whether the value was stored.
    pub fn set_if_fresh(
        &self,
        key: impl Into<String>,
        value: CacheValue,
        entry_type: EntryType,
        ttl: Option<Duration>,
        tags: Vec<String>,
        observed_epoch: u64,
    ) -> bool {
        let key = key.into();
        let mut state = self.write();
        if state.is_stale(observed_epoch, &key, &tags) {
            tracing::debug!(key = %key, observed_epoch, epoch = state.epoch, "dropped stale cache write");
            return false;
        }
        self.insert(&mut state, key, value, entry_type, ttl, tags);
        true
    }

    fn insert(
        &self,
        state: &mut CacheState,
        key: String,
        value: CacheValue,
        entry_type: EntryType,
        ttl: Option<Duration>,
        tags: Vec<String>,
    ) {
        let settings = self.settings.current();
        let ttl = ttl.unwrap_or_else(|| entry_type.default_ttl(&settings.cache));
        let now = Instant::now();

        state.remove(&key);
        for tag in &tags {
            state.tags.entry(tag.clone()).or_default().insert(key.clone());
        }
        state
            .entries
            .insert(key.clone(), CacheEntry::new(entry_type, value, ttl, tags, now));

        let capacity = settings.cache.capacity;
        if state.entries.len() > capacity {
            self.evict(state, capacity, &key, now);
        }
    }

    /// Remove every entry carrying `tag_or_pattern` as a tag, or matching it
    /// as a key. A `*` in the argument matches any run of characters against
    /// both tags and keys. Returns the number of entries removed.
    pub fn invalidate(&self, tag_or_pattern: &str) -> usize {
        let mut state = self.write();

        let doomed: HashSet<String> = if tag_or_pattern.contains('*') {
            let pattern = format!("^{}$", regex::escape(tag_or_pattern).replace(r"\*", ".*"));
            let re = match regex::Regex::new(&pattern) {
                Ok(re) => re,
                Err(e) => {
                    tracing::warn!(pattern = tag_or_pattern, error = %e, "invalid invalidation pattern");
                    return 0;
                }
            };
            let by_tag = state
                .tags
                .iter()
                .filter(|(tag, _)| re.is_match(tag))
                .flat_map(|(_, keys)| keys.iter().cloned());
            let by_key = state.entries.keys().filter(|k| re.is_match(k)).cloned();
            let doomed = by_tag.chain(by_key).collect();
            state.record_invalidation(None, Some(re));
            doomed
        } else {
            let mut keys = state.tags.get(tag_or_pattern).cloned().unwrap_or_default();
            if state.entries.contains_key(tag_or_pattern) {
                keys.insert(tag_or_pattern.to_string());
            }
            state.record_invalidation(Some(tag_or_pattern), None);
            keys
        };

        let removed = doomed.iter().filter(|key| state.remove(key).is_some()).count();
        if removed > 0 {
            tracing::debug!(tag = tag_or_pattern, removed, "cache invalidated");
        }
        removed
    }

    /// Remove a single key.
    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.write();
        state.record_invalidation(Some(key), None);
        state.remove(key).is_some()
    }

    /// Load every key in `keys` that is not already live, concurrently.
    /// Returns how many entries were stored.
    pub async fn warm(&self, keys: &[String], loader: &dyn CacheLoader) -> usize {
        let missing: Vec<&String> = keys.iter().filter(|key| !self.contains(key)).collect();
        if missing.is_empty() {
            return 0;
        }

        let epoch = self.epoch();
        let loads = missing.iter().map(|key| loader.load(key));
        let loaded = futures::future::join_all(loads).await;

        let mut stored = 0;
        for (key, entry) in missing.into_iter().zip(loaded) {
            match entry {
                Some(entry) => {
                    if self.set_if_fresh(key.clone(), entry.value, entry.entry_type, None, entry.tags, epoch) {
                        stored += 1;
                    }
                }
                None => tracing::debug!(key = %key, "warm key could not be loaded"),
            }
        }
        tracing::debug!(requested = keys.len(), stored, "cache warmed");
        stored
    }

    /// Keys of live entries carrying `tag`, sorted.
    pub fn keys_with_tag(&self, tag: &str) -> Vec<String> {
        let now = Instant::now();
        let state = self.read();
        let mut keys: Vec<String> = state
            .tags
            .get(tag)
            .into_iter()
            .flatten()
            .filter(|key| state.entries.get(*key).is_some_and(|e| e.is_live(now)))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Entry type of a live entry.
    pub fn entry_type(&self, key: &str) -> Option<EntryType> {
        let now = Instant::now();
        self.read()
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.entry_type)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.write();
        Self::purge(&mut state, now)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.write();
        state.entries.clear();
        state.tags.clear();
        state.invalidated.clear();
        state.patterns.clear();
        state.epoch += 1;
        state.floor = state.epoch;
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let half_life = self.half_life();
        let (hits, misses, evictions) = self.counters.snapshot();

        let state = self.read();
        let mut scored: Vec<KeyScore> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(key, e)| KeyScore {
                key: key.clone(),
                score: e.score(now, half_life),
                access_count: e.access_count(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));

        let hottest = scored.iter().take(STATS_TOP_N).cloned().collect();
        let coldest = scored.iter().rev().take(STATS_TOP_N).cloned().collect();

        CacheStats {
            hits,
            misses,
            hit_rate: stats::hit_rate(hits, misses),
            size: state.entries.len(),
            evictions,
            hottest,
            coldest,
        }
    }

    fn evict(&self, state: &mut CacheState, capacity: usize, keep: &str, now: Instant) {
        let expired = Self::purge(state, now);
        let half_life = self.half_life();

        let mut evicted = 0;
        while state.entries.len() > capacity {
            let victim = state
                .entries
                .iter()
                .filter(|(key, _)| key.as_str() != keep)
                .min_by(|(ka, a), (kb, b)| {
                    a.score(now, half_life)
                        .total_cmp(&b.score(now, half_life))
                        .then_with(|| a.last_access().cmp(&b.last_access()))
                        .then_with(|| ka.cmp(kb))
                })
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    state.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }

        let total = (expired + evicted) as u64;
        if total > 0 {
            self.counters.evicted(total);
            tracing::debug!(expired, evicted, capacity, "cache evicted entries");
        }
    }

    fn purge(state: &mut CacheState, now: Instant) -> usize {
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| !e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    fn half_life(&self) -> Duration {
        Duration::from_secs(self.settings.current().cache.recency_half_life_seconds)
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
