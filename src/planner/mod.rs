//! Query builder - turns a [`QueryIntent`] plus resolved mappings into SQL.
//!
//! Build steps:
//! 1. Enumerate mapping combinations from each term's top mapping and its
//!    near-ties, most confident first; equal confidence prefers terms that
//!    live in the metric's table.
//! 2. Load the referenced tables (every table of the database when more
//!    than one is involved, so join paths may pass through others).
//! 3. Infer joins from declared foreign keys.
//! 4. Assemble SELECT / FROM / JOIN / WHERE / GROUP BY / ORDER BY / LIMIT.
//! 5. Check grouping, then run a local syntax check on the rendered SQL.
//!
//! The first combination that plans is the primary query, later ones are
//! its alternatives. Planning errors surface only when every combination
//! fails, and then as the first combination's error.
//!
//! Columns are emitted bare for single-table queries and table-qualified
//! once a join is present.

mod filters;
mod generated;
mod hints;
mod intent;
mod join_graph;

pub use generated::{
    CostClass, GeneratedQuery, HintReason, IndexHint, InferredJoin, OptimizationHints, ValidResult,
};
pub use intent::{is_year_key, Aggregation, FilterValue, OrderBy, QueryIntent, Scalar, TimePeriod};
pub use join_graph::JoinGraph;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::config::{EngineSettings, SettingsHandle};
use crate::error::{EngineError, EngineResult};
use crate::mapper::{normalize_term, SemanticMapping};
use crate::schema::{ColumnSchema, ElementPath, SchemaCatalog, TableSchema, TypeFamily};
use crate::sql::expr::{avg, col, conjunction, count, count_star, max, min, sum, table_col};
use crate::sql::{
    syntax_check, Dialect, Expr, ExprExt, OrderByExpr, Query, SelectExpr, TableRef, TimeGrain,
};
use hints::{ColumnUse, Shape};

/// Resolved candidates per business term, best first.
pub type TermMappings = BTreeMap<String, Vec<SemanticMapping>>;

/// Slack when comparing confidences against the ambiguity delta.
const DELTA_EPSILON: f64 = 1e-9;

/// Upper bound on mapping combinations tried per build.
const MAX_COMBINATIONS: usize = 32;

pub struct QueryBuilder {
    catalog: SchemaCatalog,
    settings: SettingsHandle,
}

/// The mapping used for each term, keyed by normalized term, in intent order.
#[derive(Debug, Clone)]
struct Selection {
    picks: Vec<(String, SemanticMapping)>,
}

impl Selection {
    fn get(&self, term: &str) -> EngineResult<&SemanticMapping> {
        let key = normalize_term(term);
        self.picks
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, m)| m)
            .ok_or_else(|| EngineError::InvalidIntent(format!("term '{}' has no mapping", term)))
    }

    fn mappings(&self) -> impl Iterator<Item = &SemanticMapping> {
        self.picks.iter().map(|(_, m)| m)
    }

    fn confidence(&self) -> f64 {
        geometric_mean(self.mappings().map(|m| m.confidence))
    }

    /// Picks that sit in the same table as the first (metric) pick.
    fn locality(&self) -> usize {
        let Some((_, metric)) = self.picks.first() else {
            return 0;
        };
        let home = (&metric.path.database, metric.table());
        self.picks
            .iter()
            .skip(1)
            .filter(|(_, m)| (&m.path.database, m.table()) == home)
            .count()
    }
}

/// Table descriptions loaded for one build.
#[derive(Debug, Default)]
struct SchemaView {
    tables: HashMap<(String, String), TableSchema>,
    complete: HashSet<String>,
}

impl SchemaView {
    fn table(&self, database: &str, table: &str) -> EngineResult<&TableSchema> {
        self.tables
            .get(&(database.to_string(), table.to_string()))
            .ok_or_else(|| EngineError::UnknownElement(format!("{}.{}", database, table)))
    }

    fn in_database<'a>(&'a self, database: &'a str) -> impl Iterator<Item = &'a TableSchema> + 'a {
        self.tables
            .iter()
            .filter(move |((db, _), _)| db == database)
            .map(|(_, t)| t)
    }
}

impl QueryBuilder {
    pub fn new(catalog: SchemaCatalog, settings: SettingsHandle) -> Self {
        Self { catalog, settings }
    }

    /// Build SQL for `intent` from `mappings` (as returned by the mapper).
    pub async fn build(&self, intent: &QueryIntent, mappings: &TermMappings) -> EngineResult<GeneratedQuery> {
        let settings = self.settings.current();
        check_intent(intent)?;
        let dialect = Dialect::parse(&settings.query.dialect).unwrap_or_default();

        let combinations = select(
            intent,
            mappings,
            settings.mapper.min_confidence,
            settings.mapper.ambiguity_delta,
        )?;

        let wanted = 1 + settings.query.max_alternatives;
        let mut view = SchemaView::default();
        let mut planned: Vec<GeneratedQuery> = Vec::new();
        let mut first_error = None;
        for selection in &combinations {
            if planned.len() >= wanted {
                break;
            }
            let planned_one = match self.load_into(selection, &mut view).await {
                Ok(()) => plan(intent, selection, &view, dialect, &settings),
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => Err(e),
            };
            match planned_one {
                Ok(query) => {
                    if !planned.iter().any(|p| p.sql == query.sql) {
                        planned.push(query);
                    }
                }
                Err(e) => {
                    let paths: Vec<String> = selection.mappings().map(|m| m.path.to_string()).collect();
                    tracing::debug!(paths = ?paths, error = %e, "mapping combination skipped");
                    first_error.get_or_insert(e);
                }
            }
        }

        let mut planned = planned.into_iter();
        let Some(mut primary) = planned.next() else {
            return Err(first_error
                .unwrap_or_else(|| EngineError::InvalidIntent("no mapping combination to plan".to_string())));
        };
        primary.alternatives = planned.collect();

        tracing::debug!(
            sql = %primary.sql,
            confidence = primary.confidence,
            alternatives = primary.alternatives.len(),
            "query built"
        );
        Ok(primary)
    }

    /// Syntax-check `sql` locally, then dry-run it on the provider.
    ///
    /// Provider rejections come back verbatim as `Validation` errors.
    pub async fn validate(&self, sql: &str) -> EngineResult<ValidResult> {
        let dialect = Dialect::parse(&self.settings.current().query.dialect).unwrap_or_default();
        syntax_check(sql, dialect).map_err(|message| syntax_error(sql, message))?;
        let plan = self.catalog.provider().dry_run(sql).await?;
        Ok(ValidResult {
            sql: sql.to_string(),
            plan,
        })
    }

    /// Describe every table `selection` needs that `view` lacks.
    async fn load_into(&self, selection: &Selection, view: &mut SchemaView) -> EngineResult<()> {
        let mut wanted: BTreeSet<(String, String)> = selection
            .mappings()
            .filter_map(|m| m.table().map(|t| (m.path.database.clone(), t.to_string())))
            .collect();

        if wanted.len() > 1 {
            let databases: BTreeSet<String> = wanted.iter().map(|(db, _)| db.clone()).collect();
            for database in databases {
                if view.complete.contains(&database) {
                    continue;
                }
                for info in self.catalog.tables(&database).await? {
                    wanted.insert((database.clone(), info.name));
                }
                view.complete.insert(database);
            }
        }

        wanted.retain(|key| !view.tables.contains_key(key));
        let described = futures::future::try_join_all(
            wanted.iter().map(|(db, table)| self.catalog.table(db, table)),
        )
        .await?;
        for table in described {
            view.tables
                .insert((table.database.clone(), table.name.clone()), table);
        }
        Ok(())
    }
}

fn check_intent(intent: &QueryIntent) -> EngineResult<()> {
    if normalize_term(&intent.metric).is_empty() {
        return Err(EngineError::InvalidIntent("metric is empty".to_string()));
    }
    if !intent.group_by.is_empty() && intent.aggregation == Aggregation::None {
        return Err(EngineError::InvalidIntent(
            "group_by requires an aggregation".to_string(),
        ));
    }
    if intent.limit == Some(0) {
        return Err(EngineError::InvalidIntent("limit must be at least 1".to_string()));
    }
    Ok(())
}

/// Plausible mapping combinations, best first.
///
/// Each term contributes its top mapping and the near-ties within `delta`
/// of it. Combinations are ordered by confidence, then by how many terms
/// share the metric's table, then by the mapper's ranking.
fn select(intent: &QueryIntent, mappings: &TermMappings, floor: f64, delta: f64) -> EngineResult<Vec<Selection>> {
    let mut choices: Vec<(String, Vec<SemanticMapping>)> = Vec::new();

    for term in intent.terms() {
        let key = normalize_term(&term);
        let mut candidates = lookup(mappings, &term, &key).to_vec();
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let Some(top) = candidates.iter().find(|m| m.confidence >= floor).map(|m| m.confidence) else {
            return Err(EngineError::AmbiguousMapping {
                term,
                floor,
                candidates,
            });
        };
        let mut plausible: Vec<SemanticMapping> = Vec::new();
        for m in candidates {
            if m.confidence >= floor
                && top - m.confidence <= delta + DELTA_EPSILON
                && !plausible.iter().any(|p| p.path == m.path)
            {
                plausible.push(m);
            }
        }
        choices.push((key, plausible));
    }

    // Odometer over the per-term choices, first term varying slowest.
    let mut combinations = Vec::new();
    let mut cursor = vec![0usize; choices.len()];
    loop {
        combinations.push(Selection {
            picks: choices
                .iter()
                .zip(&cursor)
                .map(|((key, options), &i)| (key.clone(), options[i].clone()))
                .collect(),
        });
        if combinations.len() >= MAX_COMBINATIONS {
            break;
        }
        let mut advanced = false;
        for (slot, (_, options)) in cursor.iter_mut().zip(&choices).rev() {
            if *slot + 1 < options.len() {
                *slot += 1;
                advanced = true;
                break;
            }
            *slot = 0;
        }
        if !advanced {
            break;
        }
    }

    combinations.sort_by(|a, b| {
        let (ca, cb) = (a.confidence(), b.confidence());
        let by_confidence = if (ca - cb).abs() <= DELTA_EPSILON {
            std::cmp::Ordering::Equal
        } else {
            cb.total_cmp(&ca)
        };
        by_confidence.then_with(|| b.locality().cmp(&a.locality()))
    });
    Ok(combinations)
}

fn lookup<'a>(mappings: &'a TermMappings, term: &str, key: &str) -> &'a [SemanticMapping] {
    mappings
        .get(term)
        .or_else(|| {
            mappings
                .iter()
                .find(|(k, _)| normalize_term(k) == key)
                .map(|(_, v)| v)
        })
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn syntax_error(sql: &str, message: String) -> EngineError {
    EngineError::Validation {
        sql: Some(sql.to_string()),
        code: Some("SYNTAX".to_string()),
        message,
    }
}

/// Table and column a mapping points at.
fn column_of<'v>(
    view: &'v SchemaView,
    mapping: &SemanticMapping,
    term: &str,
) -> EngineResult<(&'v TableSchema, &'v ColumnSchema)> {
    let (Some(table), Some(column)) = (mapping.table(), mapping.column()) else {
        return Err(EngineError::InvalidIntent(format!(
            "term '{}' maps to {} '{}', a column is needed",
            term, mapping.kind, mapping.path
        )));
    };
    let table = view.table(&mapping.path.database, table)?;
    let column = table
        .find_column(column)
        .ok_or_else(|| EngineError::UnknownElement(mapping.path.to_string()))?;
    Ok((table, column))
}

/// Render one statement for `selection`.
fn plan(
    intent: &QueryIntent,
    selection: &Selection,
    view: &SchemaView,
    dialect: Dialect,
    settings: &EngineSettings,
) -> EngineResult<GeneratedQuery> {
    let sql_dialect = dialect.as_dyn();
    let metric = selection.get(&intent.metric)?;
    let database = metric.path.database.as_str();
    let base_name = metric.table().ok_or_else(|| {
        EngineError::InvalidIntent(format!(
            "metric '{}' maps to database '{}', not a table or column",
            intent.metric, metric.path
        ))
    })?;
    let base = view.table(database, base_name)?;

    // Every other table the terms point into, in first-mention order.
    let mut tables: Vec<&str> = Vec::new();
    for mapping in selection.mappings() {
        let Some(table) = mapping.table() else {
            continue;
        };
        if mapping.path.database != database {
            return Err(EngineError::NoJoinPath {
                from: base.qualified_name(),
                to: format!("{}.{}", mapping.path.database, table),
            });
        }
        if !table.eq_ignore_ascii_case(&base.name) && !tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
            tables.push(table);
        }
    }

    let joins = if tables.is_empty() {
        Vec::new()
    } else {
        JoinGraph::from_tables(view.in_database(database)).connect(&base.name, &tables)?
    };
    let qualify = !joins.is_empty();
    let column_ref = |table: &str, column: &str| {
        if qualify {
            table_col(table, column)
        } else {
            col(column)
        }
    };
    let temporal = || {
        base.temporal_column().ok_or_else(|| {
            EngineError::InvalidIntent(format!(
                "table '{}' has no date column for time grains or year filters",
                base.name
            ))
        })
    };

    let mut referenced: BTreeSet<ElementPath> = selection.mappings().map(|m| m.path.clone()).collect();
    let mut uses: Vec<ColumnUse<'_>> = Vec::new();

    // Metric
    let aggregated = intent.aggregation != Aggregation::None;
    let metric_expr = match metric.column() {
        None if intent.aggregation == Aggregation::Count => count_star(),
        None => {
            return Err(EngineError::InvalidIntent(format!(
                "metric '{}' maps to table '{}'; only count applies",
                intent.metric, metric.path
            )))
        }
        Some(_) => {
            let (table, column) = column_of(view, metric, &intent.metric)?;
            let numeric_only = matches!(intent.aggregation, Aggregation::Sum | Aggregation::Avg);
            if numeric_only && column.family() != TypeFamily::Numeric {
                return Err(EngineError::InvalidIntent(format!(
                    "cannot {:?} non-numeric column '{}' ({})",
                    intent.aggregation, metric.path, column.data_type
                )));
            }
            let expr = column_ref(&table.name, &column.name);
            match intent.aggregation {
                Aggregation::Sum => sum(expr),
                Aggregation::Count => count(expr),
                Aggregation::Avg => avg(expr),
                Aggregation::Min => min(expr),
                Aggregation::Max => max(expr),
                Aggregation::None => expr,
            }
        }
    };

    // WHERE
    let mut predicates = Vec::new();
    for (key, value) in &intent.filters {
        if is_year_key(key) {
            let date = temporal()?;
            let year = sql_dialect.year_of(column_ref(&base.name, &date.name));
            predicates.push(filters::year_predicate(key, year, value)?);
            referenced.insert(ElementPath::column(database, &base.name, &date.name));
            uses.push(ColumnUse {
                table: base,
                column: &date.name,
                reason: HintReason::Filter,
            });
        } else {
            let mapping = selection.get(key)?;
            let (table, column) = column_of(view, mapping, key)?;
            predicates.push(filters::column_predicate(
                key,
                column_ref(&table.name, &column.name),
                column.family(),
                value,
                sql_dialect,
            )?);
            uses.push(ColumnUse {
                table,
                column: &column.name,
                reason: HintReason::Filter,
            });
        }
    }
    if let Some(period) = intent.time_period.filter(|p| p.start.is_some() || p.end.is_some()) {
        let date = temporal()?;
        if let Some(predicate) = filters::period_predicate(column_ref(&base.name, &date.name), &period)? {
            predicates.push(predicate);
            referenced.insert(ElementPath::column(database, &base.name, &date.name));
            uses.push(ColumnUse {
                table: base,
                column: &date.name,
                reason: HintReason::Filter,
            });
        }
    }
    let has_filter = !predicates.is_empty();

    // SELECT and GROUP BY
    let mut select: Vec<SelectExpr> = Vec::new();
    let mut group: Vec<Expr> = Vec::new();
    for term in &intent.group_by {
        if let Some(grain) = TimeGrain::parse(term) {
            let date = temporal()?;
            let bucket = sql_dialect.time_bucket(grain, column_ref(&base.name, &date.name));
            let group_expr = if sql_dialect.supports_group_by_alias() {
                col(grain.as_str())
            } else {
                bucket.clone()
            };
            if group.contains(&group_expr) {
                continue;
            }
            group.push(group_expr);
            select.push(SelectExpr::aliased(bucket, grain.as_str()));
            referenced.insert(ElementPath::column(database, &base.name, &date.name));
            uses.push(ColumnUse {
                table: base,
                column: &date.name,
                reason: HintReason::GroupBy,
            });
        } else {
            let mapping = selection.get(term)?;
            let (table, column) = column_of(view, mapping, term)?;
            let expr = column_ref(&table.name, &column.name);
            if group.contains(&expr) {
                continue;
            }
            group.push(expr.clone());
            select.push(SelectExpr::new(expr));
            uses.push(ColumnUse {
                table,
                column: &column.name,
                reason: HintReason::GroupBy,
            });
        }
    }
    select.push(SelectExpr::new(metric_expr.clone()));

    if aggregated {
        for item in &select {
            if item.expr.contains_aggregate() {
                continue;
            }
            let by_alias = item.alias.as_deref().is_some_and(|a| group.contains(&col(a)));
            if !by_alias && !group.contains(&item.expr) {
                return Err(EngineError::InvalidIntent(format!(
                    "'{}' is selected but neither aggregated nor grouped",
                    item.expr.to_sql(sql_dialect)
                )));
            }
        }
    }

    // ORDER BY
    let mut order_by = Vec::new();
    if let Some(order) = &intent.order_by {
        let expr = if normalize_term(&order.term) == normalize_term(&intent.metric) {
            metric_expr
        } else if let Some(grain) = TimeGrain::parse(&order.term) {
            let alias = grain.as_str();
            if !select.iter().any(|s| s.alias.as_deref() == Some(alias)) {
                return Err(EngineError::InvalidIntent(format!(
                    "cannot order by '{}': it is not grouped",
                    order.term
                )));
            }
            col(alias)
        } else {
            let mapping = selection.get(&order.term)?;
            let (table, column) = column_of(view, mapping, &order.term)?;
            let expr = column_ref(&table.name, &column.name);
            if aggregated && !group.contains(&expr) {
                return Err(EngineError::InvalidIntent(format!(
                    "cannot order by '{}': it is neither the metric nor grouped",
                    order.term
                )));
            }
            expr
        };
        order_by.push(OrderByExpr {
            expr,
            dir: order.direction,
        });
    }

    // Assemble
    let mut query = Query::new()
        .select(select)
        .from(TableRef::new(&base.name));
    for join in &joins {
        let on = conjunction(
            join.left_columns
                .iter()
                .zip(&join.right_columns)
                .map(|(l, r)| table_col(&join.left_table, l).eq(table_col(&join.right_table, r)))
                .collect(),
        )
        .ok_or_else(|| EngineError::NoJoinPath {
            from: join.left_table.clone(),
            to: join.right_table.clone(),
        })?;
        query = query.inner_join(TableRef::new(&join.right_table), on);
        for (l, r) in join.left_columns.iter().zip(&join.right_columns) {
            referenced.insert(ElementPath::column(database, &join.left_table, l));
            referenced.insert(ElementPath::column(database, &join.right_table, r));
        }
    }
    let query = query
        .filter(conjunction(predicates))
        .group_by(group)
        .order_by(order_by)
        .limit(intent.limit);

    let sql = query.to_sql(sql_dialect);
    syntax_check(&sql, dialect).map_err(|message| syntax_error(&sql, message))?;

    let hints = hints::analyze(
        &uses,
        Shape {
            base,
            join_count: joins.len(),
            has_filter,
        },
        &settings.query,
        sql_dialect,
    );

    Ok(GeneratedQuery {
        sql,
        dialect,
        referenced: referenced.into_iter().collect(),
        joins,
        confidence: selection.confidence(),
        alternatives: Vec::new(),
        hints,
        mappings: selection.mappings().cloned().collect(),
    })
}

fn geometric_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0u32), |(sum, n), v| (sum + v.max(f64::MIN_POSITIVE).ln(), n + 1));
    if n == 0 {
        return 0.0;
    }
    (sum / f64::from(n)).exp().clamp(0.0, 1.0)
}
