//! Snapshot diffing.
//!
//! Objects are matched by kind and path. A removed and an added sibling
//! with otherwise identical definitions are paired into one rename.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::schema::{ColumnSchema, ElementPath, ObjectKind, SchemaObject, TableSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Retyped,
    Renamed,
    ConstraintChanged,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Retyped => "retyped",
            ChangeKind::Renamed => "renamed",
            ChangeKind::ConstraintChanged => "constraint-changed",
        };
        f.write_str(s)
    }
}

/// One difference between two snapshots of the same database.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDiff {
    pub kind: ChangeKind,
    pub object_kind: ObjectKind,
    pub before: Option<SchemaObject>,
    pub after: Option<SchemaObject>,
}

impl ObjectDiff {
    /// Path after the change, or before it for removals.
    pub fn path(&self) -> ElementPath {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(SchemaObject::path)
            .unwrap_or_else(|| ElementPath::database(""))
    }

    /// Tables touched, old name first for renames.
    pub fn tables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for obj in self.before.iter().chain(self.after.iter()) {
            if let Some(table) = obj.table_name() {
                if !out.iter().any(|t| t == table) {
                    out.push(table.to_string());
                }
            }
        }
        out
    }
}

/// Differences from `before` to `after`, ordered by path.
pub fn diff(before: &[SchemaObject], after: &[SchemaObject]) -> Vec<ObjectDiff> {
    let old: BTreeMap<String, &SchemaObject> = before.iter().map(|o| (o.snapshot_key(), o)).collect();
    let new: BTreeMap<String, &SchemaObject> = after.iter().map(|o| (o.snapshot_key(), o)).collect();

    let mut removed: Vec<&SchemaObject> = old
        .iter()
        .filter(|(key, _)| !new.contains_key(*key))
        .map(|(_, o)| *o)
        .collect();
    let mut added: Vec<&SchemaObject> = new
        .iter()
        .filter(|(key, _)| !old.contains_key(*key))
        .map(|(_, o)| *o)
        .collect();

    let mut out = Vec::new();

    // Table renames first; their columns and indexes move with them.
    let renamed_tables = pair_renames(&mut removed, &mut added, |a, b| match (a, b) {
        (SchemaObject::Table(a), SchemaObject::Table(b)) => {
            a.database == b.database && same_table_body(a, b, before, after)
        }
        _ => false,
    });
    let mut moved: BTreeSet<(String, String)> = BTreeSet::new();
    for (from, to) in renamed_tables {
        if let (SchemaObject::Table(a), SchemaObject::Table(b)) = (from, to) {
            moved.insert((a.database.clone(), a.name.clone()));
            moved.insert((b.database.clone(), b.name.clone()));
        }
        out.push(ObjectDiff {
            kind: ChangeKind::Renamed,
            object_kind: ObjectKind::Table,
            before: Some(from.clone()),
            after: Some(to.clone()),
        });
    }
    let in_moved_table = |o: &SchemaObject| {
        o.kind() != ObjectKind::Table
            && o.table_name()
                .is_some_and(|t| moved.contains(&(o.database_name().to_string(), t.to_string())))
    };
    removed.retain(|o| !in_moved_table(*o));
    added.retain(|o| !in_moved_table(*o));

    let renamed_columns = pair_renames(&mut removed, &mut added, |a, b| match (a, b) {
        (SchemaObject::Column(a), SchemaObject::Column(b)) => {
            a.database == b.database && a.table == b.table && same_column_body(&a.column, &b.column)
        }
        _ => false,
    });
    for (from, to) in renamed_columns {
        out.push(ObjectDiff {
            kind: ChangeKind::Renamed,
            object_kind: ObjectKind::Column,
            before: Some(from.clone()),
            after: Some(to.clone()),
        });
    }

    for obj in removed {
        out.push(ObjectDiff {
            kind: ChangeKind::Removed,
            object_kind: obj.kind(),
            before: Some(obj.clone()),
            after: None,
        });
    }
    for obj in added {
        out.push(ObjectDiff {
            kind: ChangeKind::Added,
            object_kind: obj.kind(),
            before: None,
            after: Some(obj.clone()),
        });
    }

    for (key, old_obj) in &old {
        let Some(new_obj) = new.get(key) else {
            continue;
        };
        if let Some(kind) = modification(old_obj, new_obj) {
            out.push(ObjectDiff {
                kind,
                object_kind: old_obj.kind(),
                before: Some((*old_obj).clone()),
                after: Some((*new_obj).clone()),
            });
        }
    }

    out.sort_by(|a, b| {
        a.path()
            .cmp(&b.path())
            .then_with(|| kind_rank(a.object_kind).cmp(&kind_rank(b.object_kind)))
    });
    out
}

fn kind_rank(kind: ObjectKind) -> u8 {
    match kind {
        ObjectKind::Database => 0,
        ObjectKind::Table => 1,
        ObjectKind::Column => 2,
        ObjectKind::Index => 3,
    }
}

/// Pair each removed object with the single added object `same` accepts.
/// Ambiguous candidates (more than one match either way) stay unpaired.
fn pair_renames<'a>(
    removed: &mut Vec<&'a SchemaObject>,
    added: &mut Vec<&'a SchemaObject>,
    same: impl Fn(&SchemaObject, &SchemaObject) -> bool,
) -> Vec<(&'a SchemaObject, &'a SchemaObject)> {
    let mut pairs = Vec::new();
    let mut i = 0;
    while i < removed.len() {
        let from = removed[i];
        let matches: Vec<usize> = added
            .iter()
            .enumerate()
            .filter(|(_, to)| same(from, **to))
            .map(|(j, _)| j)
            .collect();
        let rivals = removed
            .iter()
            .filter(|other| matches.len() == 1 && same(**other, added[matches[0]]))
            .count();
        if let ([j], 1) = (matches.as_slice(), rivals) {
            let to = added.remove(*j);
            removed.remove(i);
            pairs.push((from, to));
        } else {
            i += 1;
        }
    }
    pairs
}

fn same_column_body(a: &ColumnSchema, b: &ColumnSchema) -> bool {
    a.data_type.eq_ignore_ascii_case(&b.data_type)
        && a.nullable == b.nullable
        && a.default == b.default
        && a.primary_key == b.primary_key
        && a.foreign_key == b.foreign_key
}

/// Same columns (name and type) under a different table name.
fn same_table_body(a: &TableSchema, b: &TableSchema, before: &[SchemaObject], after: &[SchemaObject]) -> bool {
    let columns = |objects: &[SchemaObject], table: &TableSchema| -> Vec<(String, String)> {
        let mut cols: Vec<(String, String)> = objects
            .iter()
            .filter_map(|o| match o {
                SchemaObject::Column(c) if c.database == table.database && c.table == table.name => {
                    Some((c.column.name.to_lowercase(), c.column.data_type.to_lowercase()))
                }
                _ => None,
            })
            .collect();
        cols.sort();
        cols
    };
    let old_cols = columns(before, a);
    !old_cols.is_empty() && old_cols == columns(after, b)
}

/// How an object present in both snapshots changed, if it did.
fn modification(before: &SchemaObject, after: &SchemaObject) -> Option<ChangeKind> {
    match (before, after) {
        (SchemaObject::Column(a), SchemaObject::Column(b)) => {
            if !a.column.data_type.eq_ignore_ascii_case(&b.column.data_type) {
                Some(ChangeKind::Retyped)
            } else if !same_column_body(&a.column, &b.column) {
                Some(ChangeKind::ConstraintChanged)
            } else {
                None
            }
        }
        (SchemaObject::Table(a), SchemaObject::Table(b)) => {
            let mut fa = a.foreign_keys.clone();
            let mut fb = b.foreign_keys.clone();
            fa.sort_by(|x, y| x.columns.cmp(&y.columns));
            fb.sort_by(|x, y| x.columns.cmp(&y.columns));
            let fk_changed = fa.len() != fb.len()
                || fa.iter().zip(&fb).any(|(x, y)| {
                    x.columns != y.columns
                        || x.referenced_table != y.referenced_table
                        || x.referenced_columns != y.referenced_columns
                });
            (fk_changed || a.engine != b.engine).then_some(ChangeKind::ConstraintChanged)
        }
        (SchemaObject::Index(a), SchemaObject::Index(b)) => {
            (a.index.columns != b.index.columns || a.index.unique != b.index.unique)
                .then_some(ChangeKind::ConstraintChanged)
        }
        (SchemaObject::Database(a), SchemaObject::Database(b)) => {
            (a.charset != b.charset || a.collation != b.collation).then_some(ChangeKind::ConstraintChanged)
        }
        _ => None,
    }
}
