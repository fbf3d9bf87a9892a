//! Structured query intent supplied by callers.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::mapper::normalize_term;
use crate::sql::{SortDir, TimeGrain};

/// Aggregate applied to the metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Count,
    Avg,
    Min,
    Max,
    #[default]
    None,
}

/// A literal filter operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(n) => Some(*n as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Bool(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(n) => Some(*n),
            Scalar::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Scalar::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(n) => write!(f, "{}", n),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Int(n)
    }
}

impl From<i32> for Scalar {
    fn from(n: i32) -> Self {
        Scalar::Int(n.into())
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// Right-hand side of a filter: a value, a list, or an inclusive range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Eq(Scalar),
    In(Vec<Scalar>),
    Range {
        #[serde(default)]
        from: Option<Scalar>,
        #[serde(default)]
        to: Option<Scalar>,
    },
}

/// Inclusive date range applied to the metric table's temporal column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriod {
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub term: String,
    #[serde(default)]
    pub direction: SortDir,
}

/// What the caller wants computed.
///
/// Group-by terms that name a calendar grain (`month`, `quarterly`, ...)
/// bucket the metric table's date column; a `year` filter key compares the
/// year of that column. Every other term is mapped to a schema element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub metric: String,
    #[serde(default)]
    pub filters: BTreeMap<String, FilterValue>,
    #[serde(default)]
    pub time_period: Option<TimePeriod>,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl QueryIntent {
    pub fn new(metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
            filters: BTreeMap::new(),
            time_period: None,
            aggregation: Aggregation::None,
            group_by: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn group_by(mut self, term: &str) -> Self {
        self.group_by.push(term.to_string());
        self
    }

    pub fn filter(mut self, key: &str, value: impl Into<Scalar>) -> Self {
        self.filters
            .insert(key.to_string(), FilterValue::Eq(value.into()));
        self
    }

    pub fn filter_in<S: Into<Scalar>>(mut self, key: &str, values: impl IntoIterator<Item = S>) -> Self {
        self.filters.insert(
            key.to_string(),
            FilterValue::In(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn between(mut self, key: &str, from: impl Into<Scalar>, to: impl Into<Scalar>) -> Self {
        self.filters.insert(
            key.to_string(),
            FilterValue::Range {
                from: Some(from.into()),
                to: Some(to.into()),
            },
        );
        self
    }

    pub fn during(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.time_period = Some(TimePeriod { start, end });
        self
    }

    pub fn order_by(mut self, term: &str, direction: SortDir) -> Self {
        self.order_by = Some(OrderBy {
            term: term.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Business terms that must be mapped to schema elements, in intent
    /// order, without duplicates.
    pub fn terms(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |term: &str| {
            let key = normalize_term(term);
            if !key.is_empty() && !out.iter().any(|t| normalize_term(t) == key) {
                out.push(term.to_string());
            }
        };

        push(&self.metric);
        for term in &self.group_by {
            if TimeGrain::parse(term).is_none() {
                push(term);
            }
        }
        for key in self.filters.keys() {
            if !is_year_key(key) {
                push(key);
            }
        }
        if let Some(order) = &self.order_by {
            if TimeGrain::parse(&order.term).is_none() {
                push(&order.term);
            }
        }
        out
    }
}

/// Filter keys that compare the year of the metric's date column.
pub fn is_year_key(key: &str) -> bool {
    TimeGrain::parse(key) == Some(TimeGrain::Year)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_filter_shapes() {
        let intent: QueryIntent = serde_json::from_str(
            r#"{
                "metric": "revenue",
                "aggregation": "sum",
                "group_by": ["month", "region"],
                "filters": {
                    "year": 2024,
                    "region": ["EU", "US"],
                    "amount": {"from": 10, "to": 20.5},
                    "channel": "web"
                },
                "order_by": {"term": "revenue", "direction": "desc"},
                "limit": 10
            }"#,
        )
        .unwrap();

        assert_eq!(intent.aggregation, Aggregation::Sum);
        assert_eq!(intent.filters["year"], FilterValue::Eq(Scalar::Int(2024)));
        assert_eq!(
            intent.filters["region"],
            FilterValue::In(vec![Scalar::Text("EU".into()), Scalar::Text("US".into())])
        );
        assert_eq!(
            intent.filters["amount"],
            FilterValue::Range {
                from: Some(Scalar::Int(10)),
                to: Some(Scalar::Float(20.5))
            }
        );
        assert_eq!(intent.order_by.unwrap().direction, SortDir::Desc);
    }

    #[test]
    fn test_terms_skip_time_grains() {
        let intent = QueryIntent::new("revenue")
            .aggregate(Aggregation::Sum)
            .group_by("monthly")
            .group_by("region")
            .filter("year", 2024)
            .filter("Region", "EU")
            .order_by("revenue", SortDir::Desc);
        assert_eq!(intent.terms(), vec!["revenue", "region"]);
    }

    #[test]
    fn test_scalar_coercions() {
        assert_eq!(Scalar::from("42").as_i64(), Some(42));
        assert_eq!(Scalar::Float(3.0).as_i64(), Some(3));
        assert_eq!(Scalar::Float(3.5).as_i64(), None);
        assert_eq!(Scalar::from(true).as_f64(), None);
    }
}
