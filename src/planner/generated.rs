//! Output of the query builder.

use serde::Serialize;

use crate::mapper::SemanticMapping;
use crate::schema::{ElementPath, QueryResult};
use crate::sql::{Dialect, JoinType};

/// A join derived from a declared foreign key.
///
/// `left_table` is already part of the query when the join is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InferredJoin {
    pub left_table: String,
    pub left_columns: Vec<String>,
    pub right_table: String,
    pub right_columns: Vec<String>,
    pub join_type: JoinType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HintReason {
    Filter,
    GroupBy,
}

/// A column the query filters or groups on that no known index covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexHint {
    pub table: String,
    pub column: String,
    pub reason: HintReason,
    /// Ready-to-run DDL.
    pub suggestion: String,
}

/// Rough cost bucket from row estimates, joins and missing indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptimizationHints {
    pub suggested_indexes: Vec<IndexHint>,
    pub cost_class: CostClass,
}

/// SQL for one intent, with everything needed to explain it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedQuery {
    pub sql: String,
    pub dialect: Dialect,
    /// Schema elements the statement touches, sorted.
    pub referenced: Vec<ElementPath>,
    pub joins: Vec<InferredJoin>,
    /// Geometric mean of the confidences of the mappings used.
    pub confidence: f64,
    /// Statements built from near-tie mappings; never nested.
    pub alternatives: Vec<GeneratedQuery>,
    pub hints: OptimizationHints,
    /// The mapping chosen for each term.
    pub mappings: Vec<SemanticMapping>,
}

impl GeneratedQuery {
    /// Tables the statement reads, base table first.
    pub fn tables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let joined = self
            .joins
            .first()
            .map(|j| j.left_table.as_str())
            .into_iter()
            .chain(self.joins.iter().map(|j| j.right_table.as_str()));
        for table in joined.chain(self.referenced.iter().filter_map(|p| p.table.as_deref())) {
            if !out.contains(&table) {
                out.push(table);
            }
        }
        out
    }
}

/// A statement the provider accepted in a dry run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidResult {
    pub sql: String,
    /// The provider's plan output for the statement.
    pub plan: QueryResult,
}
