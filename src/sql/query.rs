//! SELECT query builder.

use serde::{Deserialize, Serialize};

use super::dialect::SqlDialect;
use super::expr::Expr;

/// SELECT list item with optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: &str) -> Self {
        Self {
            expr,
            alias: Some(alias.to_string()),
        }
    }
}

/// Table reference in FROM / JOIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: &str) -> Self {
        Self {
            schema: None,
            name: name.to_string(),
            alias: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    fn to_sql(&self, dialect: &dyn SqlDialect) -> String {
        let mut out = match &self.schema {
            Some(s) => format!(
                "{}.{}",
                dialect.quote_identifier(s),
                dialect.quote_identifier(&self.name)
            ),
            None => dialect.quote_identifier(&self.name),
        };
        if let Some(alias) = &self.alias {
            out.push_str(" AS ");
            out.push_str(&dialect.quote_identifier(alias));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub dir: SortDir,
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub select: Vec<SelectExpr>,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, items: Vec<SelectExpr>) -> Self {
        self.select.extend(items);
        self
    }

    pub fn from(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    pub fn inner_join(mut self, table: TableRef, on: Expr) -> Self {
        self.joins.push(Join {
            join_type: JoinType::Inner,
            table,
            on,
        });
        self
    }

    pub fn filter(mut self, predicate: Option<Expr>) -> Self {
        self.filter = predicate;
        self
    }

    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by.extend(exprs);
        self
    }

    pub fn order_by(mut self, items: Vec<OrderByExpr>) -> Self {
        self.order_by.extend(items);
        self
    }

    pub fn limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    /// Render as a single-line statement.
    pub fn to_sql(&self, dialect: &dyn SqlDialect) -> String {
        let mut parts = Vec::new();

        let select: Vec<String> = self
            .select
            .iter()
            .map(|item| match &item.alias {
                Some(alias) => format!(
                    "{} AS {}",
                    item.expr.to_sql(dialect),
                    dialect.quote_identifier(alias)
                ),
                None => item.expr.to_sql(dialect),
            })
            .collect();
        parts.push(format!("SELECT {}", select.join(", ")));

        if let Some(from) = &self.from {
            parts.push(format!("FROM {}", from.to_sql(dialect)));
        }

        for join in &self.joins {
            let kind = match join.join_type {
                JoinType::Inner => "INNER JOIN",
                JoinType::Left => "LEFT JOIN",
            };
            parts.push(format!(
                "{} {} ON {}",
                kind,
                join.table.to_sql(dialect),
                join.on.to_sql(dialect)
            ));
        }

        if let Some(filter) = &self.filter {
            parts.push(format!("WHERE {}", filter.to_sql(dialect)));
        }

        if !self.group_by.is_empty() {
            let group: Vec<String> = self.group_by.iter().map(|e| e.to_sql(dialect)).collect();
            parts.push(format!("GROUP BY {}", group.join(", ")));
        }

        if !self.order_by.is_empty() {
            let order: Vec<String> = self
                .order_by
                .iter()
                .map(|o| match o.dir {
                    SortDir::Asc => o.expr.to_sql(dialect),
                    SortDir::Desc => format!("{} DESC", o.expr.to_sql(dialect)),
                })
                .collect();
            parts.push(format!("ORDER BY {}", order.join(", ")));
        }

        if let Some(limit) = self.limit {
            parts.push(format!("LIMIT {}", limit));
        }

        parts.join(" ")
    }
}
