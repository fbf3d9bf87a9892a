//! Severity, impact and migration hints for a single diff.

use serde::{Deserialize, Serialize};

use super::diff::{ChangeKind, ObjectDiff};
use crate::cache::{SchemaCache, Tag};
use crate::schema::{ColumnSchema, ObjectKind, SchemaObject, TypeFamily};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Cache entries that depended on the changed objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impact {
    pub mappings: usize,
    pub queries: usize,
    pub metadata: usize,
    /// Every affected key, sorted.
    pub keys: Vec<String>,
}

impl Impact {
    pub fn summary(&self) -> String {
        if self.keys.is_empty() {
            return "no cached mappings or queries affected".to_string();
        }
        format!(
            "{} cached mapping(s), {} cached query(ies) and {} metadata entry(ies) affected",
            self.mappings, self.queries, self.metadata
        )
    }
}

pub fn severity(change: &ObjectDiff) -> Severity {
    match (change.kind, change.object_kind) {
        (ChangeKind::Removed, ObjectKind::Database | ObjectKind::Table) => Severity::Critical,
        (ChangeKind::Removed, ObjectKind::Column) => Severity::High,
        (ChangeKind::Removed, ObjectKind::Index) => Severity::Medium,
        (ChangeKind::Renamed, _) => Severity::High,
        (ChangeKind::Retyped, _) => {
            match (column(change.before.as_ref()), column(change.after.as_ref())) {
                (Some(a), Some(b)) if a.family() == b.family() && a.family() != TypeFamily::Other => {
                    Severity::Medium
                }
                _ => Severity::High,
            }
        }
        (ChangeKind::Added, ObjectKind::Column) => match column(change.after.as_ref()) {
            Some(c) if !c.nullable && c.default.is_none() => Severity::Medium,
            _ => Severity::Low,
        },
        (ChangeKind::Added, _) => Severity::Low,
        (ChangeKind::ConstraintChanged, ObjectKind::Column) => {
            match (column(change.before.as_ref()), column(change.after.as_ref())) {
                (Some(a), Some(b)) if a.primary_key != b.primary_key => Severity::High,
                (Some(a), Some(b)) if a.nullable && !b.nullable => Severity::Medium,
                _ => Severity::Low,
            }
        }
        (ChangeKind::ConstraintChanged, ObjectKind::Table) => Severity::Medium,
        (ChangeKind::ConstraintChanged, _) => Severity::Low,
    }
}

/// Cache entries tagged with the tables (or database) the change touches.
/// Must run before invalidation.
pub fn impact(cache: &SchemaCache, change: &ObjectDiff, database: &str) -> Impact {
    let mut keys: Vec<String> = if change.object_kind == ObjectKind::Database {
        cache.keys_with_tag(&Tag::database(database))
    } else {
        change
            .tables()
            .iter()
            .flat_map(|t| cache.keys_with_tag(&Tag::schema(t)))
            .collect()
    };
    keys.sort();
    keys.dedup();

    let mappings = keys.iter().filter(|k| k.starts_with("mapping:")).count();
    let queries = keys.iter().filter(|k| k.starts_with("query:")).count();
    Impact {
        mappings,
        queries,
        metadata: keys.len() - mappings - queries,
        keys,
    }
}

/// Suggested follow-ups, most useful first.
pub fn migration(change: &ObjectDiff) -> Vec<String> {
    let path = change.path();
    let before = change.before.as_ref();
    let after = change.after.as_ref();

    match (change.kind, before, after) {
        (ChangeKind::Removed, Some(SchemaObject::Column(c)), _) => vec![
            format!("Remove references to {} from saved queries and mappings", path),
            format!(
                "To restore: ALTER TABLE {} ADD COLUMN {} {}",
                c.table, c.column.name, c.column.data_type
            ),
        ],
        (ChangeKind::Removed, Some(SchemaObject::Table(t)), _) => vec![
            format!("Drop mappings and saved queries that read {}", path),
            format!("Restore {} from backup if the drop was unintended", t.name),
        ],
        (ChangeKind::Removed, Some(SchemaObject::Index(i)), _) => vec![format!(
            "To restore: CREATE {}INDEX {} ON {} ({})",
            if i.index.unique { "UNIQUE " } else { "" },
            i.index.name,
            i.table,
            i.index.columns.join(", ")
        )],
        (ChangeKind::Removed, Some(SchemaObject::Database(_)), _) => {
            vec![format!("Stop monitoring {} or restore it", path)]
        }
        (ChangeKind::Added, _, Some(SchemaObject::Column(c))) => {
            let mut out = vec![format!("Map {} to business terms if it carries one", path)];
            if !c.column.nullable && c.column.default.is_none() {
                out.push(format!(
                    "Backfill {}.{} or give it a default before inserts omit it",
                    c.table, c.column.name
                ));
            }
            out
        }
        (ChangeKind::Added, _, Some(SchemaObject::Table(_))) => {
            vec![format!("Review {} for new business terms", path)]
        }
        (ChangeKind::Added, _, _) => vec!["No action required".to_string()],
        (ChangeKind::Retyped, Some(SchemaObject::Column(a)), Some(SchemaObject::Column(b))) => vec![
            format!(
                "Review filters and aggregates on {}: type changed from {} to {}",
                path, a.column.data_type, b.column.data_type
            ),
            format!(
                "To revert: ALTER TABLE {} MODIFY COLUMN {} {}",
                a.table, a.column.name, a.column.data_type
            ),
        ],
        (ChangeKind::Renamed, Some(a), Some(b)) => {
            let revert = match (a, b) {
                (SchemaObject::Column(a), SchemaObject::Column(b)) => format!(
                    "To revert: ALTER TABLE {} RENAME COLUMN {} TO {}",
                    b.table, b.column.name, a.column.name
                ),
                _ => format!(
                    "To revert: ALTER TABLE {} RENAME TO {}",
                    b.table_name().unwrap_or_default(),
                    a.table_name().unwrap_or_default()
                ),
            };
            vec![
                format!("Update references from {} to {}", a.path(), b.path()),
                revert,
            ]
        }
        _ => vec![format!("Review constraints on {} against dependent queries", path)],
    }
}

fn column(obj: Option<&SchemaObject>) -> Option<&ColumnSchema> {
    match obj {
        Some(SchemaObject::Column(c)) => Some(&c.column),
        _ => None,
    }
}
