//! Missing-index suggestions and a coarse cost class.

use super::generated::{CostClass, HintReason, IndexHint, OptimizationHints};
use crate::config::QuerySettings;
use crate::schema::TableSchema;
use crate::sql::SqlDialect;

/// A column the statement filters or groups on.
#[derive(Debug, Clone, Copy)]
pub struct ColumnUse<'a> {
    pub table: &'a TableSchema,
    pub column: &'a str,
    pub reason: HintReason,
}

/// What the cost class looks at besides index coverage.
#[derive(Debug, Clone, Copy)]
pub struct Shape<'a> {
    pub base: &'a TableSchema,
    pub join_count: usize,
    pub has_filter: bool,
}

pub fn analyze(
    uses: &[ColumnUse<'_>],
    shape: Shape<'_>,
    settings: &QuerySettings,
    dialect: &dyn SqlDialect,
) -> OptimizationHints {
    let mut suggested: Vec<IndexHint> = Vec::new();
    let mut large_unindexed = false;

    for usage in uses {
        if usage.table.is_indexed(usage.column) {
            continue;
        }
        let duplicate = suggested
            .iter()
            .any(|h| h.table == usage.table.name && h.column.eq_ignore_ascii_case(usage.column));
        if duplicate {
            continue;
        }
        large_unindexed |= rows(usage.table) >= settings.large_table_rows;
        suggested.push(IndexHint {
            table: usage.table.name.clone(),
            column: usage.column.to_string(),
            reason: usage.reason,
            suggestion: create_index(&usage.table.name, usage.column, dialect),
        });
    }

    let base_rows = rows(shape.base);
    let cost_class = if large_unindexed
        || (!shape.has_filter && base_rows >= settings.large_table_rows)
        || shape.join_count >= 3
    {
        CostClass::High
    } else if shape.join_count > 0 || !suggested.is_empty() || base_rows >= settings.large_table_rows / 10 {
        CostClass::Medium
    } else {
        CostClass::Low
    };

    OptimizationHints {
        suggested_indexes: suggested,
        cost_class,
    }
}

fn rows(table: &TableSchema) -> u64 {
    table.row_estimate.unwrap_or(0)
}

fn create_index(table: &str, column: &str, dialect: &dyn SqlDialect) -> String {
    let name: String = format!("idx_{}_{}", table, column)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!(
        "CREATE INDEX {} ON {} ({})",
        name,
        dialect.quote_identifier(table),
        dialect.quote_identifier(column)
    )
}
