//! SQL dialect definitions and formatting rules.
//!
//! Each dialect implements [`SqlDialect`] to handle its specific syntax:
//!
//! - Identifier quoting: `` ` `` (MySQL), `"` (ANSI), only when required
//! - Boolean literals: `1`/`0` vs `TRUE`/`FALSE`
//! - Time bucketing for grain terms (`month`, `quarter`, ...)
//! - Whether GROUP BY may reference a select alias

use serde::{Deserialize, Serialize};

use super::expr::{func, lit_str, Expr};

/// Calendar grain a temporal column can be bucketed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    /// Recognize a grain term such as `month`, `monthly` or `months`.
    pub fn parse(term: &str) -> Option<Self> {
        match term.trim().to_ascii_lowercase().as_str() {
            "day" | "days" | "daily" => Some(TimeGrain::Day),
            "week" | "weeks" | "weekly" => Some(TimeGrain::Week),
            "month" | "months" | "monthly" => Some(TimeGrain::Month),
            "quarter" | "quarters" | "quarterly" => Some(TimeGrain::Quarter),
            "year" | "years" | "yearly" | "annual" => Some(TimeGrain::Year),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }
}

/// Words that must be quoted when used as identifiers.
const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "check", "column", "create", "cross",
    "delete", "desc", "distinct", "drop", "else", "exists", "from", "group", "having", "in",
    "index", "inner", "insert", "interval", "is", "join", "key", "left", "like", "limit", "not",
    "null", "on", "or", "order", "outer", "primary", "range", "references", "right", "select",
    "set", "table", "then", "to", "union", "update", "user", "using", "values", "when", "where",
    "with",
];

/// True when `ident` can be emitted bare.
pub fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    starts_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&ident.to_ascii_lowercase().as_str())
}

/// SQL dialect trait - defines how SQL constructs are rendered.
pub trait SqlDialect: std::fmt::Debug + Send + Sync {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    /// Quote an identifier if it is reserved or not a plain word.
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    fn quote_string(&self, s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }

    fn format_bool(&self, b: bool) -> &'static str;

    /// Bucket a temporal expression by `grain`.
    fn time_bucket(&self, grain: TimeGrain, expr: Expr) -> Expr;

    /// Calendar year of a temporal expression.
    fn year_of(&self, expr: Expr) -> Expr;

    /// Whether GROUP BY may name a select-list alias.
    fn supports_group_by_alias(&self) -> bool;
}

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        if is_plain_identifier(ident) {
            ident.to_string()
        } else {
            format!("`{}`", ident.replace('`', "``"))
        }
    }

    /// Backslash is an escape character in MySQL string literals, so it is
    /// doubled before the quote is.
    fn quote_string(&self, s: &str) -> String {
        format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn format_bool(&self, b: bool) -> &'static str {
        if b {
            "1"
        } else {
            "0"
        }
    }

    fn time_bucket(&self, grain: TimeGrain, expr: Expr) -> Expr {
        match grain {
            TimeGrain::Day => func("DATE", vec![expr]),
            TimeGrain::Week => func("DATE_FORMAT", vec![expr, lit_str("%x-W%v")]),
            TimeGrain::Month => func("DATE_FORMAT", vec![expr, lit_str("%Y-%m")]),
            TimeGrain::Quarter => func(
                "CONCAT",
                vec![
                    func("YEAR", vec![expr.clone()]),
                    lit_str("-Q"),
                    func("QUARTER", vec![expr]),
                ],
            ),
            TimeGrain::Year => func("YEAR", vec![expr]),
        }
    }

    fn year_of(&self, expr: Expr) -> Expr {
        func("YEAR", vec![expr])
    }

    fn supports_group_by_alias(&self) -> bool {
        true
    }
}

/// ANSI SQL dialect (PostgreSQL-style date functions).
#[derive(Debug, Clone, Copy)]
pub struct Ansi;

impl SqlDialect for Ansi {
    fn name(&self) -> &'static str {
        "ansi"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        if is_plain_identifier(ident) {
            ident.to_string()
        } else {
            format!("\"{}\"", ident.replace('"', "\"\""))
        }
    }

    fn format_bool(&self, b: bool) -> &'static str {
        if b {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    fn time_bucket(&self, grain: TimeGrain, expr: Expr) -> Expr {
        match grain {
            TimeGrain::Year => self.year_of(expr),
            other => func("DATE_TRUNC", vec![lit_str(other.as_str()), expr]),
        }
    }

    fn year_of(&self, expr: Expr) -> Expr {
        Expr::Extract {
            field: "YEAR".to_string(),
            expr: Box::new(expr),
        }
    }

    fn supports_group_by_alias(&self) -> bool {
        false
    }
}

/// Supported dialects, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    MySql,
    Ansi,
}

impl Dialect {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Dialect::MySql),
            "ansi" | "postgres" | "postgresql" => Some(Dialect::Ansi),
            _ => None,
        }
    }

    pub fn as_dyn(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::MySql => &MySql,
            Dialect::Ansi => &Ansi,
        }
    }
}
