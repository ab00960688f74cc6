#![allow(dead_code)]

use rowlink_core::storage::Migrator;
use rowlink_core::{Filter, FindOptions, Row, Storage, StorageError, StorageResult};
use std::cell::RefCell;

/// Storage wrapper recording the table of every `find` call.
pub struct CountingStorage<S> {
    inner: S,
    finds: RefCell<Vec<String>>,
}

impl<S: Storage> CountingStorage<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            finds: RefCell::new(Vec::new()),
        }
    }

    pub fn finds(&self) -> Vec<String> {
        self.finds.borrow().clone()
    }

    pub fn reset(&self) {
        self.finds.borrow_mut().clear();
    }
}

impl<S: Storage> Storage for CountingStorage<S> {
    fn find(&self, table: &str, filter: &Filter, options: &FindOptions) -> StorageResult<Vec<Row>> {
        self.finds.borrow_mut().push(table.to_string());
        self.inner.find(table, filter, options)
    }

    fn count(&self, table: &str, filter: &Filter) -> StorageResult<u64> {
        self.inner.count(table, filter)
    }

    fn insert(&self, table: &str, row: &Row) -> StorageResult<()> {
        self.inner.insert(table, row)
    }

    fn update(&self, table: &str, data: &Row, filter: &Filter) -> StorageResult<usize> {
        self.inner.update(table, data, filter)
    }

    fn delete(&self, table: &str, filter: &Filter) -> StorageResult<usize> {
        self.inner.delete(table, filter)
    }

    fn migrator(&self) -> Option<&dyn Migrator> {
        self.inner.migrator()
    }

    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StorageError>,
    {
        self.inner.atomically(work)
    }
}

/// Parents, children and toys with integer keys.
pub const FAMILY_DDL: &str = "
CREATE TABLE parents (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE children (
    id INTEGER PRIMARY KEY,
    parent_id INTEGER,
    value TEXT NOT NULL,
    deleted_at INTEGER
);
CREATE TABLE toys (id INTEGER PRIMARY KEY, child_id INTEGER, label TEXT NOT NULL);
";

/// Two parents; only parent 1 has children, only child 1 has toys.
pub const FAMILY_ROWS: &str = "
INSERT INTO parents (id, name) VALUES (1, 'a'), (2, 'b');
INSERT INTO children (id, parent_id, value) VALUES (1, 1, 'x'), (2, 1, 'y');
INSERT INTO toys (id, child_id, label) VALUES (10, 1, 'ball'), (11, 1, 'kite');
";
