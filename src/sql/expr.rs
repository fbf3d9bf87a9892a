//! Expression AST - the core of SQL expression building.
//!
//! A strongly-typed AST for the expressions the query builder emits, with
//! exhaustive rendering per dialect.

use std::collections::BTreeSet;

use super::dialect::SqlDialect;

// =============================================================================
// Expression AST
// =============================================================================

/// A SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference: optional_table.column
    Column {
        table: Option<String>,
        column: String,
    },

    /// Literal values
    Literal(Literal),

    /// Binary operation: left op right
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },

    /// NOT expr
    Not(Box<Expr>),

    /// Function call: name(args...)
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },

    /// IN: expr IN (values...)
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// BETWEEN: expr BETWEEN low AND high
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// EXTRACT(field FROM expr)
    Extract { field: String, expr: Box<Expr> },

    /// Wildcard: * or table.*
    Star { table: Option<String> },

    /// Parenthesized expression
    Paren(Box<Expr>),
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    And,
    Or,
    Like,
}

impl BinaryOperator {
    fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::Ne => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::Gt => ">",
            BinaryOperator::Lte => "<=",
            BinaryOperator::Gte => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Like => "LIKE",
        }
    }
}

const AGGREGATES: &[&str] = &["SUM", "COUNT", "AVG", "MIN", "MAX"];

impl Expr {
    /// Render for `dialect`.
    pub fn to_sql(&self, dialect: &dyn SqlDialect) -> String {
        match self {
            Expr::Column { table, column } => match table {
                Some(t) => format!(
                    "{}.{}",
                    dialect.quote_identifier(t),
                    dialect.quote_identifier(column)
                ),
                None => dialect.quote_identifier(column),
            },
            Expr::Literal(lit) => match lit {
                Literal::Int(n) => n.to_string(),
                Literal::Float(f) => format_float(*f),
                Literal::String(s) => dialect.quote_string(s),
                Literal::Bool(b) => dialect.format_bool(*b).to_string(),
                Literal::Null => "NULL".to_string(),
            },
            Expr::BinaryOp { left, op, right } => format!(
                "{} {} {}",
                left.to_sql(dialect),
                op.as_str(),
                right.to_sql(dialect)
            ),
            Expr::Not(expr) => format!("NOT {}", expr.to_sql(dialect)),
            Expr::Function {
                name,
                args,
                distinct,
            } => {
                let args: Vec<String> = args.iter().map(|a| a.to_sql(dialect)).collect();
                let distinct = if *distinct { "DISTINCT " } else { "" };
                format!("{}({}{})", name, distinct, args.join(", "))
            }
            Expr::In {
                expr,
                values,
                negated,
            } => {
                let values: Vec<String> = values.iter().map(|v| v.to_sql(dialect)).collect();
                let not = if *negated { "NOT " } else { "" };
                format!("{} {}IN ({})", expr.to_sql(dialect), not, values.join(", "))
            }
            Expr::Between { expr, low, high } => format!(
                "{} BETWEEN {} AND {}",
                expr.to_sql(dialect),
                low.to_sql(dialect),
                high.to_sql(dialect)
            ),
            Expr::IsNull { expr, negated } => {
                let not = if *negated { "NOT " } else { "" };
                format!("{} IS {}NULL", expr.to_sql(dialect), not)
            }
            Expr::Extract { field, expr } => {
                format!("EXTRACT({} FROM {})", field, expr.to_sql(dialect))
            }
            Expr::Star { table } => match table {
                Some(t) => format!("{}.*", dialect.quote_identifier(t)),
                None => "*".to_string(),
            },
            Expr::Paren(expr) => format!("({})", expr.to_sql(dialect)),
        }
    }

    /// True for a call to an aggregate function.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Function { name, .. } if AGGREGATES.contains(&name.to_ascii_uppercase().as_str()))
    }

    /// True when an aggregate appears anywhere in the expression.
    pub fn contains_aggregate(&self) -> bool {
        if self.is_aggregate() {
            return true;
        }
        self.children().iter().any(|c| c.contains_aggregate())
    }

    /// Columns referenced outside any aggregate, as `table.column` or `column`.
    pub fn bare_columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_bare_columns(&mut out);
        out
    }

    fn collect_bare_columns(&self, out: &mut BTreeSet<String>) {
        if self.is_aggregate() {
            return;
        }
        if let Expr::Column { table, column } = self {
            out.insert(match table {
                Some(t) => format!("{}.{}", t, column),
                None => column.clone(),
            });
        }
        for child in self.children() {
            child.collect_bare_columns(out);
        }
    }

    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column { .. } | Expr::Literal(_) | Expr::Star { .. } => vec![],
            Expr::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Not(e) | Expr::Paren(e) => vec![e.as_ref()],
            Expr::IsNull { expr, .. } | Expr::Extract { expr, .. } => vec![expr.as_ref()],
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::In { expr, values, .. } => std::iter::once(expr.as_ref()).chain(values.iter()).collect(),
            Expr::Between { expr, low, high } => vec![expr.as_ref(), low.as_ref(), high.as_ref()],
        }
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

// =============================================================================
// Constructors
// =============================================================================

pub fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        column: name.to_string(),
    }
}

pub fn table_col(table: &str, column: &str) -> Expr {
    Expr::Column {
        table: Some(table.to_string()),
        column: column.to_string(),
    }
}

pub fn lit_int(n: i64) -> Expr {
    Expr::Literal(Literal::Int(n))
}

pub fn lit_float(f: f64) -> Expr {
    Expr::Literal(Literal::Float(f))
}

pub fn lit_str(s: &str) -> Expr {
    Expr::Literal(Literal::String(s.to_string()))
}

pub fn lit_bool(b: bool) -> Expr {
    Expr::Literal(Literal::Bool(b))
}

pub fn lit_null() -> Expr {
    Expr::Literal(Literal::Null)
}

pub fn star() -> Expr {
    Expr::Star { table: None }
}

pub fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function {
        name: name.to_string(),
        args,
        distinct: false,
    }
}

pub fn sum(expr: Expr) -> Expr {
    func("SUM", vec![expr])
}

pub fn count(expr: Expr) -> Expr {
    func("COUNT", vec![expr])
}

pub fn count_star() -> Expr {
    func("COUNT", vec![star()])
}

pub fn count_distinct(expr: Expr) -> Expr {
    Expr::Function {
        name: "COUNT".to_string(),
        args: vec![expr],
        distinct: true,
    }
}

pub fn avg(expr: Expr) -> Expr {
    func("AVG", vec![expr])
}

pub fn min(expr: Expr) -> Expr {
    func("MIN", vec![expr])
}

pub fn max(expr: Expr) -> Expr {
    func("MAX", vec![expr])
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        lit_int(n)
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        lit_int(n.into())
    }
}

impl From<f64> for Expr {
    fn from(f: f64) -> Self {
        lit_float(f)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        lit_str(s)
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        lit_bool(b)
    }
}

// =============================================================================
// Expression Builder Trait
// =============================================================================

/// Extension trait for building expressions fluently.
pub trait ExprExt: Sized {
    fn into_expr(self) -> Expr;

    fn binary(self, op: BinaryOperator, other: impl Into<Expr>) -> Expr {
        Expr::BinaryOp {
            left: Box::new(self.into_expr()),
            op,
            right: Box::new(other.into()),
        }
    }

    fn eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Eq, other)
    }

    fn ne(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Ne, other)
    }

    fn gt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Gt, other)
    }

    fn gte(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Gte, other)
    }

    fn lt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Lt, other)
    }

    fn lte(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Lte, other)
    }

    fn and(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::And, other)
    }

    fn or(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Or, other)
    }

    fn like(self, pattern: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Like, pattern)
    }

    fn not(self) -> Expr {
        Expr::Not(Box::new(self.into_expr()))
    }

    fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Expr {
        Expr::Between {
            expr: Box::new(self.into_expr()),
            low: Box::new(low.into()),
            high: Box::new(high.into()),
        }
    }

    fn in_list(self, values: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self.into_expr()),
            values,
            negated: false,
        }
    }

    fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: false,
        }
    }

    fn paren(self) -> Expr {
        Expr::Paren(Box::new(self.into_expr()))
    }
}

impl ExprExt for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

/// AND together a list of predicates; `None` when empty.
pub fn conjunction(predicates: Vec<Expr>) -> Option<Expr> {
    predicates.into_iter().reduce(|acc, p| {
        let wrap = |e: Expr| match e {
            Expr::BinaryOp {
                op: BinaryOperator::Or,
                ..
            } => e.paren(),
            other => other,
        };
        wrap(acc).and(wrap(p))
    })
}
