//! Typed WHERE predicates.
//!
//! Literals are shaped by the target column's type family: numbers for
//! numeric columns, quoted strings for text, validated dates for temporal
//! columns. A bare integer against a temporal column compares its year.

use chrono::{NaiveDate, NaiveDateTime};

use super::intent::{FilterValue, Scalar, TimePeriod};
use crate::error::{EngineError, EngineResult};
use crate::schema::TypeFamily;
use crate::sql::expr::{lit_bool, lit_float, lit_int, lit_str};
use crate::sql::{Expr, ExprExt, SqlDialect};

/// Predicate for `key` compared against a column of type `family`.
pub fn column_predicate(
    key: &str,
    column: Expr,
    family: TypeFamily,
    value: &FilterValue,
    dialect: &dyn SqlDialect,
) -> EngineResult<Expr> {
    if family == TypeFamily::Temporal && scalars(value).all(|s| matches!(s, Scalar::Int(_))) {
        return year_predicate(key, dialect.year_of(column), value);
    }
    let literal = |s: &Scalar| literal_for(key, family, s);

    match value {
        FilterValue::Eq(s) => Ok(column.eq(literal(s)?)),
        FilterValue::In(values) => {
            if values.is_empty() {
                return Err(EngineError::InvalidIntent(format!("filter '{}' has an empty list", key)));
            }
            let literals = values.iter().map(literal).collect::<EngineResult<Vec<_>>>()?;
            Ok(column.in_list(literals))
        }
        FilterValue::Range { from, to } => {
            if family == TypeFamily::Text || family == TypeFamily::Boolean {
                return Err(EngineError::InvalidIntent(format!(
                    "filter '{}' is a range but the column is not ordered",
                    key
                )));
            }
            let from = from.as_ref().map(literal).transpose()?;
            let to = to.as_ref().map(literal).transpose()?;
            range(key, column, from, to)
        }
    }
}

/// Predicate comparing `year_expr` against integer years.
pub fn year_predicate(key: &str, year_expr: Expr, value: &FilterValue) -> EngineResult<Expr> {
    let year = |s: &Scalar| {
        s.as_i64()
            .filter(|y| (1..=9999).contains(y))
            .map(lit_int)
            .ok_or_else(|| EngineError::InvalidIntent(format!("filter '{}' expects a year, got '{}'", key, s)))
    };

    match value {
        FilterValue::Eq(s) => Ok(year_expr.eq(year(s)?)),
        FilterValue::In(values) => {
            if values.is_empty() {
                return Err(EngineError::InvalidIntent(format!("filter '{}' has an empty list", key)));
            }
            let years = values.iter().map(year).collect::<EngineResult<Vec<_>>>()?;
            Ok(year_expr.in_list(years))
        }
        FilterValue::Range { from, to } => {
            let from = from.as_ref().map(year).transpose()?;
            let to = to.as_ref().map(year).transpose()?;
            range(key, year_expr, from, to)
        }
    }
}

/// `column >= start AND column < end + 1 day`; `None` when unbounded.
pub fn period_predicate(column: Expr, period: &TimePeriod) -> EngineResult<Option<Expr>> {
    if let (Some(start), Some(end)) = (period.start, period.end) {
        if end < start {
            return Err(EngineError::InvalidIntent(format!(
                "time period ends ({}) before it starts ({})",
                end, start
            )));
        }
    }

    let lower = period.start.map(|start| column.clone().gte(date_literal(start)));
    let upper = period.end.map(|end| match end.succ_opt() {
        Some(next) => column.clone().lt(date_literal(next)),
        None => column.clone().lte(date_literal(end)),
    });

    Ok(match (lower, upper) {
        (Some(lo), Some(hi)) => Some(lo.and(hi)),
        (lo, hi) => lo.or(hi),
    })
}

fn range(key: &str, expr: Expr, from: Option<Expr>, to: Option<Expr>) -> EngineResult<Expr> {
    match (from, to) {
        (Some(lo), Some(hi)) => Ok(expr.between(lo, hi)),
        (Some(lo), None) => Ok(expr.gte(lo)),
        (None, Some(hi)) => Ok(expr.lte(hi)),
        (None, None) => Err(EngineError::InvalidIntent(format!("filter '{}' has an empty range", key))),
    }
}

fn scalars(value: &FilterValue) -> Box<dyn Iterator<Item = &Scalar> + '_> {
    match value {
        FilterValue::Eq(s) => Box::new(std::iter::once(s)),
        FilterValue::In(values) => Box::new(values.iter()),
        FilterValue::Range { from, to } => Box::new(from.iter().chain(to.iter())),
    }
}

fn literal_for(key: &str, family: TypeFamily, value: &Scalar) -> EngineResult<Expr> {
    let mismatch = |expected: &str| {
        EngineError::InvalidIntent(format!(
            "filter '{}' expects {}, got '{}'",
            key, expected, value
        ))
    };

    match family {
        TypeFamily::Numeric => numeric_literal(value).ok_or_else(|| mismatch("a number")),
        TypeFamily::Text => match value {
            Scalar::Bool(_) => Err(mismatch("text")),
            other => Ok(lit_str(&other.to_string())),
        },
        TypeFamily::Temporal => match value {
            Scalar::Text(s) => parse_temporal(s).map(lit_str).ok_or_else(|| mismatch("a date (YYYY-MM-DD)")),
            _ => Err(mismatch("a date (YYYY-MM-DD)")),
        },
        TypeFamily::Boolean => match value {
            Scalar::Bool(b) => Ok(lit_bool(*b)),
            Scalar::Int(0) => Ok(lit_bool(false)),
            Scalar::Int(1) => Ok(lit_bool(true)),
            Scalar::Text(s) if s.eq_ignore_ascii_case("true") => Ok(lit_bool(true)),
            Scalar::Text(s) if s.eq_ignore_ascii_case("false") => Ok(lit_bool(false)),
            _ => Err(mismatch("a boolean")),
        },
        TypeFamily::Other => match value {
            Scalar::Text(s) => Ok(lit_str(s)),
            Scalar::Bool(b) => Ok(lit_bool(*b)),
            other => numeric_literal(other).ok_or_else(|| mismatch("a literal")),
        },
    }
}

fn numeric_literal(value: &Scalar) -> Option<Expr> {
    match value {
        Scalar::Int(n) => Some(lit_int(*n)),
        Scalar::Float(f) if f.is_finite() => Some(lit_float(*f)),
        Scalar::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(lit_int)
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(lit_float))
        }
        _ => None,
    }
}

/// Canonical text of a date or datetime literal, if it parses.
fn parse_temporal(s: &str) -> Option<&str> {
    let s = s.trim();
    let valid = NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok();
    valid.then_some(s)
}

fn date_literal(date: NaiveDate) -> Expr {
    lit_str(&date.format("%Y-%m-%d").to_string())
}
