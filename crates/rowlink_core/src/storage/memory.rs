//! In-process storage backend without a query language.
//!
//! # Responsibility
//! - Serve the storage contract for non-SQL deployments and tests.
//! - Evaluate filters in-process with the same coercions SQLite applies.
//!
//! # Invariants
//! - Has no migrator, so many-to-many relations cannot be registered on it.
//! - `Filter::Raw` is rejected, never silently ignored.
//! - Rows keep insertion order.

use super::{Storage, StorageError, StorageResult};
use crate::filter::{Filter, FindOptions};
use crate::value::Row;
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Table-name keyed row store behind interior mutability.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RefCell<BTreeMap<String, Vec<Row>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an empty table. Reads and writes against undeclared tables fail.
    pub fn create_table(&self, table: &str) {
        self.tables
            .borrow_mut()
            .entry(table.to_string())
            .or_default();
    }

    /// Returns a copy of every row in `table`.
    pub fn rows(&self, table: &str) -> StorageResult<Vec<Row>> {
        self.tables
            .borrow()
            .get(table)
            .cloned()
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }
}

fn ensure_evaluable(filter: &Filter) -> StorageResult<()> {
    if filter.contains_raw() {
        return Err(StorageError::Unsupported(
            "raw filter expressions on memory storage",
        ));
    }
    Ok(())
}

fn is_match(filter: &Filter, row: &Row) -> bool {
    filter.matches(row).unwrap_or(false)
}

impl Storage for MemoryStorage {
    fn find(
        &self,
        table: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StorageResult<Vec<Row>> {
        ensure_evaluable(filter)?;
        let tables = self.tables.borrow();
        let rows = tables
            .get(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;

        let mut matched: Vec<&Row> = rows.iter().filter(|row| is_match(filter, row)).collect();
        if !options.order_by.is_empty() {
            // Stable sort keeps insertion order between equal keys.
            matched.sort_by(|left, right| {
                for order in &options.order_by {
                    let left_value = left.get(&order.column);
                    let right_value = right.get(&order.column);
                    let ordering = match (left_value, right_value) {
                        (Some(l), Some(r)) => l.sort_cmp(r),
                        (None, Some(_)) => std::cmp::Ordering::Less,
                        (Some(_), None) => std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    };
                    let ordering = if order.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if ordering.is_ne() {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let offset = usize::try_from(options.offset).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));

        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| project(row, &options.fields))
            .collect())
    }

    fn count(&self, table: &str, filter: &Filter) -> StorageResult<u64> {
        ensure_evaluable(filter)?;
        let tables = self.tables.borrow();
        let rows = tables
            .get(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        Ok(rows.iter().filter(|row| is_match(filter, row)).count() as u64)
    }

    fn insert(&self, table: &str, row: &Row) -> StorageResult<()> {
        let mut tables = self.tables.borrow_mut();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        rows.push(row.clone());
        Ok(())
    }

    fn update(&self, table: &str, data: &Row, filter: &Filter) -> StorageResult<usize> {
        ensure_evaluable(filter)?;
        let mut tables = self.tables.borrow_mut();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;

        let mut changed = 0;
        for row in rows.iter_mut().filter(|row| is_match(filter, row)) {
            for (column, value) in data {
                row.insert(column.clone(), value.clone());
            }
            changed += 1;
        }
        Ok(changed)
    }

    fn delete(&self, table: &str, filter: &Filter) -> StorageResult<usize> {
        ensure_evaluable(filter)?;
        let mut tables = self.tables.borrow_mut();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;

        let before = rows.len();
        rows.retain(|row| !is_match(filter, row));
        Ok(before - rows.len())
    }

    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StorageError>,
    {
        let snapshot = self.tables.borrow().clone();
        let result = work();
        if result.is_err() {
            *self.tables.borrow_mut() = snapshot;
        }
        result
    }
}

fn project(row: &Row, fields: &[String]) -> Row {
    if fields.is_empty() {
        return row.clone();
    }
    fields
        .iter()
        .filter_map(|field| row.get(field).map(|value| (field.clone(), value.clone())))
        .collect()
}
