//! Key tuples and composite-key filters.
//!
//! A key tuple is the ordered list of values a row holds in a relation's key
//! columns. Its composite key is the string form used as a hash-join key on
//! both sides of a relation.
//!
//! Each component is written as a storage-class tag, the fragment length and
//! the fragment itself, so no text or blob content can make two different
//! tuples share a key.
//!
//! # Invariants
//! - Rows with a missing or null key component never join and are skipped.
//! - Tuples are distinct by composite key and keep first-encounter order.
//! - Composite filters match exactly the collected tuples, never a cross
//!   product of their components.

use crate::filter::Filter;
use crate::value::{Row, Value};
use std::collections::HashSet;

pub type KeyTuple = Vec<Value>;

/// Joins key fragments into one hash-join key.
pub fn tuple_key(values: &[Value]) -> Option<String> {
    let mut key = String::new();
    for value in values {
        push_component(&mut key, value)?;
    }
    Some(key)
}

/// Composite key of `row` over `columns`, `None` when any component is absent.
pub fn composite_key(row: &Row, columns: &[String]) -> Option<String> {
    let mut key = String::new();
    for column in columns {
        push_component(&mut key, row.get(column)?)?;
    }
    Some(key)
}

fn push_component(key: &mut String, value: &Value) -> Option<()> {
    let class = match value {
        Value::Bool(_) | Value::Int(_) | Value::Float(_) => 'n',
        Value::Text(_) => 't',
        Value::Bytes(_) => 'b',
        Value::Null | Value::Map(_) | Value::List(_) => return None,
    };
    let fragment = value.key_fragment()?;
    key.push(class);
    key.push_str(&fragment.len().to_string());
    key.push(':');
    key.push_str(&fragment);
    Some(())
}

/// Collects the distinct key tuples of `rows` over `columns`.
pub fn collect_key_tuples(rows: &[Row], columns: &[String]) -> Vec<KeyTuple> {
    if columns.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut tuples = Vec::new();
    for row in rows {
        let Some(tuple) = columns
            .iter()
            .map(|column| row.get(column).filter(|value| !value.is_null()).cloned())
            .collect::<Option<KeyTuple>>()
        else {
            continue;
        };
        let Some(key) = tuple_key(&tuple) else {
            continue;
        };
        if seen.insert(key) {
            tuples.push(tuple);
        }
    }
    tuples
}

/// Builds the filter matching rows whose `columns` equal one of `tuples`.
///
/// Returns `None` when there is nothing to match; callers then skip the
/// storage query entirely.
pub fn build_composite_filter(columns: &[String], tuples: &[KeyTuple]) -> Option<Filter> {
    if columns.is_empty() || tuples.is_empty() {
        return None;
    }

    if let [column] = columns {
        let values: Vec<Value> = tuples
            .iter()
            .filter_map(|tuple| tuple.first().cloned())
            .collect();
        return Some(match values.len() {
            1 => Filter::Eq(column.clone(), values.into_iter().next()?),
            _ => Filter::In(column.clone(), values),
        });
    }

    Some(Filter::InTuples {
        columns: columns.to_vec(),
        tuples: tuples.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::{build_composite_filter, collect_key_tuples, composite_key, tuple_key};
    use crate::filter::Filter;
    use crate::value::{row, Row, Value};

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn collect_skips_null_and_missing_and_dedupes() {
        let rows: Vec<Row> = vec![
            row([("a", Value::Int(1)), ("b", Value::Int(2))]),
            row([("a", Value::Int(1)), ("b", Value::Int(2))]),
            row([("a", Value::Int(1)), ("b", Value::Null)]),
            row([("a", Value::Int(3))]),
            row([("a", Value::Int(2)), ("b", Value::Int(1))]),
        ];
        let tuples = collect_key_tuples(&rows, &columns(&["a", "b"]));
        assert_eq!(
            tuples,
            vec![
                vec![Value::Int(1), Value::Int(2)],
                vec![Value::Int(2), Value::Int(1)],
            ]
        );
    }

    #[test]
    fn composite_keys_agree_across_numeric_representations() {
        let left = row([("id", Value::Int(7))]);
        let right = row([("parent_id", Value::Float(7.0))]);
        assert_eq!(
            composite_key(&left, &columns(&["id"])),
            composite_key(&right, &columns(&["parent_id"]))
        );
        assert_eq!(tuple_key(&[Value::Int(7)]), Some("n1:7".to_string()));
        assert_eq!(composite_key(&left, &columns(&["missing"])), None);
    }

    #[test]
    fn keys_do_not_collide_across_separators_or_storage_classes() {
        let split_left = tuple_key(&[Value::from("a\u{1f}b"), Value::from("c")]);
        let split_right = tuple_key(&[Value::from("a"), Value::from("b\u{1f}c")]);
        assert_ne!(split_left, split_right);

        let shifted_left = tuple_key(&[Value::from("1:a"), Value::from("b")]);
        let shifted_right = tuple_key(&[Value::from("1"), Value::from("a:b")]);
        assert_ne!(shifted_left, shifted_right);

        assert_ne!(
            tuple_key(&[Value::Bytes(vec![0xab])]),
            tuple_key(&[Value::from("ab")])
        );
        assert_ne!(tuple_key(&[Value::from("7")]), tuple_key(&[Value::Int(7)]));
        assert_eq!(tuple_key(&[Value::Bool(true)]), tuple_key(&[Value::Int(1)]));
    }

    #[test]
    fn single_column_filters_use_eq_or_in() {
        let one = build_composite_filter(&columns(&["id"]), &[vec![Value::Int(1)]]);
        assert_eq!(one, Some(Filter::eq("id", 1)));

        let many = build_composite_filter(
            &columns(&["id"]),
            &[vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        assert_eq!(many, Some(Filter::is_in("id", [1, 2])));
        assert_eq!(build_composite_filter(&columns(&["id"]), &[]), None);
    }

    #[test]
    fn multi_column_filter_is_one_tuple_membership_test() {
        let tuples = vec![
            vec![Value::Int(1), Value::Int(2)],
            vec![Value::Int(2), Value::Int(1)],
        ];
        assert_eq!(
            build_composite_filter(&columns(&["a", "b"]), &tuples),
            Some(Filter::InTuples {
                columns: columns(&["a", "b"]),
                tuples,
            })
        );
    }

    #[test]
    fn multi_column_filter_matches_only_listed_tuples() {
        let filter = build_composite_filter(
            &columns(&["a", "b"]),
            &[
                vec![Value::Int(1), Value::Int(2)],
                vec![Value::Int(2), Value::Int(1)],
            ],
        )
        .unwrap();

        assert_eq!(filter.matches(&row([("a", 1), ("b", 2)])), Some(true));
        assert_eq!(filter.matches(&row([("a", 2), ("b", 1)])), Some(true));
        assert_eq!(filter.matches(&row([("a", 1), ("b", 1)])), Some(false));
        assert_eq!(filter.matches(&row([("a", 2), ("b", 2)])), Some(false));
    }
}
