//! Backend-neutral row filters and read options.
//!
//! # Responsibility
//! - Describe which rows a storage call applies to.
//! - Evaluate filters in-process for backends without a query language.
//!
//! # Invariants
//! - `Filter::All` is the identity for `Filter::and`.
//! - `Filter::In` and `Filter::InTuples` with no values match nothing.

use crate::value::{Row, Value};

/// Row predicate understood by every storage backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Filter {
    /// Matches every row.
    #[default]
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    /// Row-value membership: `columns` equal one of `tuples`, component-wise.
    InTuples {
        columns: Vec<String>,
        tuples: Vec<Vec<Value>>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    /// Backend-native expression with positional `?` parameters.
    ///
    /// Only SQL backends accept it.
    Raw { sql: String, params: Vec<Value> },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Raw {
            sql: sql.into(),
            params,
        }
    }

    /// Conjunction that flattens nested `And` and drops `All`.
    pub fn and(self, other: Filter) -> Filter {
        let mut parts = Vec::new();
        for filter in [self, other] {
            match filter {
                Self::All => {}
                Self::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Self::All,
            1 => parts.remove(0),
            _ => Self::And(parts),
        }
    }

    /// Returns whether this filter references a `Raw` expression.
    pub fn contains_raw(&self) -> bool {
        match self {
            Self::Raw { .. } => true,
            Self::And(parts) | Self::Or(parts) => parts.iter().any(Filter::contains_raw),
            _ => false,
        }
    }

    /// Evaluates the filter against one row.
    ///
    /// Returns `None` when the filter contains a `Raw` expression.
    pub fn matches(&self, row: &Row) -> Option<bool> {
        match self {
            Self::All => Some(true),
            Self::Eq(column, expected) => Some(value_of(row, column).loose_eq(expected)),
            Self::In(column, values) => {
                let actual = value_of(row, column);
                Some(values.iter().any(|candidate| actual.loose_eq(candidate)))
            }
            Self::IsNull(column) => Some(value_of(row, column).is_null()),
            Self::InTuples { columns, tuples } => Some(tuples.iter().any(|tuple| {
                tuple.len() == columns.len()
                    && columns
                        .iter()
                        .zip(tuple)
                        .all(|(column, expected)| value_of(row, column).loose_eq(expected))
            })),
            Self::And(parts) => {
                for part in parts {
                    if !part.matches(row)? {
                        return Some(false);
                    }
                }
                Some(true)
            }
            Self::Or(parts) => {
                let mut matched = false;
                for part in parts {
                    if part.matches(row)? {
                        matched = true;
                    }
                }
                Some(matched)
            }
            Self::Raw { .. } => None,
        }
    }
}

const NULL_VALUE: &Value = &Value::Null;

fn value_of<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(NULL_VALUE)
}

/// Sort key for reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Projection, ordering and paging for one read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Columns to fetch. Empty means all columns.
    pub fields: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl FindOptions {
    pub fn with_fields(fields: Vec<String>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }
}
