//! SQL generation: a small typed AST rendered per dialect, plus a local
//! syntax pre-check with `sqlparser`.

pub mod dialect;
pub mod expr;
pub mod query;

pub use dialect::{Ansi, Dialect, MySql, SqlDialect, TimeGrain};
pub use expr::{BinaryOperator, Expr, ExprExt, Literal};
pub use query::{Join, JoinType, OrderByExpr, Query, SelectExpr, SortDir, TableRef};

use sqlparser::dialect::{GenericDialect, MySqlDialect};
use sqlparser::parser::Parser;

/// Parse `sql` locally and reject anything that is not a single SELECT.
///
/// Returns the parser's message verbatim on failure.
pub fn syntax_check(sql: &str, dialect: Dialect) -> Result<(), String> {
    let statements = match dialect {
        Dialect::MySql => Parser::parse_sql(&MySqlDialect {}, sql),
        Dialect::Ansi => Parser::parse_sql(&GenericDialect {}, sql),
    }
    .map_err(|e| e.to_string())?;

    match statements.as_slice() {
        [sqlparser::ast::Statement::Query(_)] => Ok(()),
        [] => Err("empty statement".to_string()),
        [_] => Err("only SELECT statements are accepted".to_string()),
        _ => Err(format!("expected one statement, found {}", statements.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_check_accepts_generated_select() {
        let sql = "SELECT DATE_FORMAT(date, '%Y-%m') AS month, SUM(revenue) FROM sales WHERE YEAR(date) = 2024 GROUP BY month";
        assert!(syntax_check(sql, Dialect::MySql).is_ok());
    }

    #[test]
    fn test_syntax_check_rejects_garbage_and_writes() {
        assert!(syntax_check("SELEC revenue FROM", Dialect::MySql).is_err());
        assert_eq!(
            syntax_check("DELETE FROM sales", Dialect::MySql).unwrap_err(),
            "only SELECT statements are accepted"
        );
        assert!(syntax_check("SELECT 1; SELECT 2", Dialect::Ansi).is_err());
    }
}
