//! Schemaless row values.
//!
//! # Responsibility
//! - Model rows whose columns are only known at runtime.
//! - Provide the stringified key material used by hash joins.
//!
//! # Invariants
//! - `Null`, `Map` and `List` are never usable as join key components.
//! - Integers and integral floats produce the same key fragment, so a join
//!   does not depend on which storage class a backend returned.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

/// One row: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Dynamic column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Nested row, written by `Single` relations.
    Map(Row),
    /// Nested list, written by `Many` and `ManyToMany` relations.
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the key fragment for composite-key building.
    ///
    /// Returns `None` for values that cannot identify a join point.
    pub fn key_fragment(&self) -> Option<String> {
        match self {
            Self::Null | Self::Map(_) | Self::List(_) => None,
            Self::Bool(value) => Some(if *value { "1" } else { "0" }.to_string()),
            Self::Int(value) => Some(value.to_string()),
            Self::Float(value) => {
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
                    Some((*value as i64).to_string())
                } else {
                    Some(value.to_string())
                }
            }
            Self::Text(value) => Some(value.clone()),
            Self::Bytes(value) => Some(value.iter().map(|b| format!("{b:02x}")).collect()),
        }
    }

    /// Loose equality with SQLite-like coercion between numbers and booleans.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.key_fragment(), other.key_fragment()) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }

    /// Total order used for sorting rows in non-SQL backends.
    ///
    /// Null sorts first, numbers compare numerically, everything else by key
    /// fragment.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.as_f64(), other.as_f64()) {
            (Some(left), Some(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
            _ => match (self.key_fragment(), other.key_fragment()) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(left), Some(right)) => left.cmp(&right),
            },
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Row> {
        match self {
            Self::Map(row) => Some(row),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Row> for Value {
    fn from(value: Row) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Builds a row from `(column, value)` pairs.
pub fn row<K, V, I>(pairs: I) -> Row
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{row, Value};
    use std::cmp::Ordering;
    use uuid::Uuid;

    #[test]
    fn integral_float_and_int_share_key_fragment() {
        assert_eq!(Value::Int(7).key_fragment(), Value::Float(7.0).key_fragment());
        assert_ne!(Value::Int(7).key_fragment(), Value::Float(7.5).key_fragment());
    }

    #[test]
    fn null_and_containers_are_not_key_material() {
        assert_eq!(Value::Null.key_fragment(), None);
        assert_eq!(Value::List(Vec::new()).key_fragment(), None);
        assert_eq!(Value::Map(row::<&str, i64, _>([])).key_fragment(), None);
    }

    #[test]
    fn bool_matches_sqlite_integer_storage() {
        assert!(Value::Bool(false).loose_eq(&Value::Int(0)));
        assert!(!Value::Bool(true).loose_eq(&Value::Int(0)));
        assert!(!Value::Null.loose_eq(&Value::Null));
    }

    #[test]
    fn sort_cmp_orders_null_first_and_numbers_numerically() {
        assert_eq!(Value::Null.sort_cmp(&Value::Int(1)), Ordering::Less);
        assert_eq!(Value::Int(10).sort_cmp(&Value::Int(9)), Ordering::Greater);
        assert_eq!(
            Value::from("b").sort_cmp(&Value::from("a")),
            Ordering::Greater
        );
    }

    #[test]
    fn uuid_converts_to_hyphenated_text() {
        let id = Uuid::new_v4();
        assert_eq!(Value::from(id), Value::Text(id.to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }
}
