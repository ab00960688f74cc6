//! Hash-join indexes over fetched related rows.

use super::keys::composite_key;
use crate::value::Row;
use std::collections::HashMap;

/// Maps each composite key to the position of the last row carrying it.
pub fn build_relation_map_single(items: &[Row], columns: &[String]) -> HashMap<String, usize> {
    let mut index = HashMap::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        if let Some(key) = composite_key(item, columns) {
            index.insert(key, position);
        }
    }
    index
}

/// Maps each composite key to every row position carrying it, in fetch order.
pub fn build_relation_map_many(
    items: &[Row],
    columns: &[String],
) -> HashMap<String, Vec<usize>> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (position, item) in items.iter().enumerate() {
        if let Some(key) = composite_key(item, columns) {
            index.entry(key).or_default().push(position);
        }
    }
    index
}
