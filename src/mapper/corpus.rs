//! Matchable schema elements built from described tables.

use std::collections::HashSet;

use super::normalize::{normalize_term, tokens};
use super::types::ElementFilter;
use crate::schema::{ColumnSchema, ElementPath, ObjectKind, TableSchema, TypeFamily};

/// One table or column as seen by the matching strategies.
#[derive(Debug, Clone)]
pub struct Element {
    pub path: ElementPath,
    pub kind: ObjectKind,
    pub name: String,
    pub data_type: Option<String>,
    /// Normalized element name.
    pub normalized: String,
    /// Normalized `table_column` for columns.
    pub qualified: Option<String>,
    /// Normalized comment, treated as an alias.
    pub alias: Option<String>,
    pub name_tokens: Vec<String>,
    /// Name, owning table and comment tokens.
    pub document: Vec<String>,
}

impl Element {
    fn table(table: &TableSchema) -> Self {
        let name_tokens = tokens(&table.name);
        let mut document = name_tokens.clone();
        if let Some(comment) = &table.comment {
            document.extend(tokens(comment));
        }
        Self {
            path: ElementPath::table(&table.database, &table.name),
            kind: ObjectKind::Table,
            name: table.name.clone(),
            data_type: None,
            normalized: name_tokens.join("_"),
            qualified: None,
            alias: table.comment.as_deref().map(normalize_term),
            name_tokens,
            document,
        }
    }

    fn column(table: &TableSchema, column: &ColumnSchema) -> Self {
        let name_tokens = tokens(&column.name);
        let table_tokens = tokens(&table.name);
        let mut document = name_tokens.clone();
        document.extend(table_tokens.iter().cloned());
        if let Some(comment) = &column.comment {
            document.extend(tokens(comment));
        }
        let qualified = table_tokens
            .iter()
            .chain(name_tokens.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("_");
        Self {
            path: ElementPath::column(&table.database, &table.name, &column.name),
            kind: ObjectKind::Column,
            name: column.name.clone(),
            data_type: Some(column.data_type.clone()),
            normalized: name_tokens.join("_"),
            qualified: Some(qualified),
            alias: column.comment.as_deref().map(normalize_term),
            name_tokens,
            document,
        }
    }

    /// True when the normalized term names this element outright.
    pub fn is_exact(&self, term: &str) -> bool {
        !term.is_empty()
            && (self.normalized == term
                || self.qualified.as_deref() == Some(term)
                || self.alias.as_deref() == Some(term))
    }

    fn passes(&self, filter: &ElementFilter) -> bool {
        let db_ok = filter.databases.is_empty()
            || filter
                .databases
                .iter()
                .any(|d| d.eq_ignore_ascii_case(&self.path.database));
        let table_ok = filter.tables.is_empty()
            || self
                .path
                .table
                .as_deref()
                .is_some_and(|t| filter.tables.iter().any(|f| f.eq_ignore_ascii_case(t)));
        let kind_ok = filter.kind.map_or(true, |k| k == self.kind);
        let family_ok = filter.family.map_or(true, |family| {
            self.data_type
                .as_deref()
                .is_some_and(|dt| TypeFamily::of(dt) == family)
        });
        db_ok && table_ok && kind_ok && family_ok
    }
}

/// Every matchable element of the discovered schema.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    elements: Vec<Element>,
}

impl Corpus {
    pub fn build(tables: &[TableSchema], filter: Option<&ElementFilter>) -> Self {
        let mut seen = HashSet::new();
        let mut elements = Vec::new();
        for table in tables {
            let candidates = std::iter::once(Element::table(table))
                .chain(table.columns.iter().map(|c| Element::column(table, c)));
            for element in candidates {
                if filter.is_some_and(|f| !element.passes(f)) {
                    continue;
                }
                if seen.insert(element.path.clone()) {
                    elements.push(element);
                }
            }
        }
        elements.sort_by(|a, b| a.path.cmp(&b.path));
        Self { elements }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn find(&self, path: &ElementPath) -> Option<&Element> {
        self.elements.iter().find(|e| &e.path == path)
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
