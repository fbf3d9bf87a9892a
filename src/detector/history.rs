//! Bounded change history.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use super::classify::Severity;
use super::SchemaChange;
use crate::schema::ElementPath;

/// Oldest-first history, bounded by count and by age.
#[derive(Debug, Default)]
pub struct ChangeHistory {
    entries: VecDeque<SchemaChange>,
}

impl ChangeHistory {
    pub fn push(&mut self, change: SchemaChange, capacity: usize, retention: Duration) {
        self.entries.push_back(change);
        self.prune(capacity, retention, Utc::now());
    }

    pub fn prune(&mut self, capacity: usize, retention: Duration, now: DateTime<Utc>) {
        let cutoff = now - retention;
        while self.entries.front().is_some_and(|c| c.detected_at < cutoff) {
            self.entries.pop_front();
        }
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
    }

    /// Changes detected at or after `since` with at least `min_severity`.
    pub fn query(&self, since: Option<DateTime<Utc>>, min_severity: Option<Severity>) -> Vec<SchemaChange> {
        self.entries
            .iter()
            .filter(|c| since.map_or(true, |s| c.detected_at >= s))
            .filter(|c| min_severity.map_or(true, |m| c.severity >= m))
            .cloned()
            .collect()
    }

    /// Changes at `path` or below it. Renames match on either name.
    pub fn for_path(&self, path: &ElementPath) -> Vec<SchemaChange> {
        self.entries
            .iter()
            .filter(|c| {
                covers(path, &c.path) || c.before.as_ref().is_some_and(|b| covers(path, &b.path()))
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn covers(ancestor: &ElementPath, path: &ElementPath) -> bool {
    let part = |a: &Option<String>, p: &Option<String>| match (a, p) {
        (None, _) => true,
        (Some(a), Some(p)) => a.eq_ignore_ascii_case(p),
        (Some(_), None) => false,
    };
    ancestor.database.eq_ignore_ascii_case(&path.database)
        && part(&ancestor.table, &path.table)
        && (ancestor.table.is_none() || part(&ancestor.column, &path.column))
}
