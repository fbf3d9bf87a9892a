//! Mapping records and resolution inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::{ElementPath, ObjectKind, TypeFamily};

/// Strategy that produced a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Fuzzy,
    VectorSimilarity,
    AiAssisted,
    Learned,
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Fuzzy => "fuzzy",
            MatchMethod::VectorSimilarity => "vector-similarity",
            MatchMethod::AiAssisted => "ai-assisted",
            MatchMethod::Learned => "learned",
        };
        f.write_str(s)
    }
}

/// A business term resolved to one schema element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMapping {
    /// The term as normalized for matching.
    pub term: String,
    pub path: ElementPath,
    pub kind: ObjectKind,
    /// Declared type for column mappings.
    #[serde(default)]
    pub data_type: Option<String>,
    /// In [0, 1].
    pub confidence: f64,
    pub method: MatchMethod,
    /// Whether the element satisfied the caller's context. Vacuously true
    /// when no context was given.
    pub context_match: bool,
    pub usage_count: u64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl SemanticMapping {
    pub fn table(&self) -> Option<&str> {
        self.path.table.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.path.column.as_deref()
    }

    pub fn family(&self) -> TypeFamily {
        self.data_type
            .as_deref()
            .map(TypeFamily::of)
            .unwrap_or(TypeFamily::Other)
    }
}

/// Where the caller expects the term to live.
///
/// Elements outside the context are still returned, but vector matches for
/// them are discounted and they are flagged with `context_match = false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingContext {
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
}

impl MappingContext {
    pub fn tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            databases: Vec::new(),
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty() && self.tables.is_empty()
    }

    /// True when `path` falls inside this context.
    pub fn covers(&self, path: &ElementPath) -> bool {
        let db_ok = self.databases.is_empty()
            || self
                .databases
                .iter()
                .any(|d| d.eq_ignore_ascii_case(&path.database));
        let table_ok = self.tables.is_empty()
            || path
                .table
                .as_deref()
                .is_some_and(|t| self.tables.iter().any(|c| c.eq_ignore_ascii_case(t)));
        db_ok && table_ok
    }
}

/// Hard restriction on which elements are considered at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementFilter {
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub kind: Option<ObjectKind>,
    #[serde(default)]
    pub family: Option<TypeFamily>,
}

impl ElementFilter {
    pub fn columns() -> Self {
        Self {
            kind: Some(ObjectKind::Column),
            ..Self::default()
        }
    }

    pub fn numeric_columns() -> Self {
        Self {
            kind: Some(ObjectKind::Column),
            family: Some(TypeFamily::Numeric),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
