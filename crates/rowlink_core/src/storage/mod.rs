//! Storage contract consumed by the relation engine.
//!
//! # Responsibility
//! - Define the key-filtered find/count/insert/update/delete contract.
//! - Define the schema-migration primitives needed for pivot tables.
//!
//! # Invariants
//! - Backends never interpret relations; they only see tables and filters.
//! - `atomically` leaves no effect behind when its closure returns `Err`.
//! - Only backends returning `Some` from `migrator` can host many-to-many
//!   relations.

use crate::db::DbError;
use crate::filter::{Filter, FindOptions};
use crate::schema::FieldType;
use crate::value::Row;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage transport and contract errors.
#[derive(Debug)]
pub enum StorageError {
    Db(DbError),
    /// Table, column or index name is not a plain identifier.
    InvalidIdentifier(String),
    /// Operation or filter form not supported by this backend.
    Unsupported(&'static str),
    UnknownTable(String),
    /// Value cannot be stored or read by this backend.
    InvalidData(String),
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidIdentifier(value) => write!(f, "invalid identifier `{value}`"),
            Self::Unsupported(what) => write!(f, "unsupported by storage backend: {what}"),
            Self::UnknownTable(table) => write!(f, "unknown table `{table}`"),
            Self::InvalidData(message) => write!(f, "invalid storage data: {message}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StorageError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Row-oriented storage backend.
pub trait Storage {
    /// Returns rows of `table` matching `filter`, in backend order unless
    /// `options.order_by` says otherwise.
    fn find(&self, table: &str, filter: &Filter, options: &FindOptions)
        -> StorageResult<Vec<Row>>;
    /// Counts rows of `table` matching `filter`.
    fn count(&self, table: &str, filter: &Filter) -> StorageResult<u64>;
    fn insert(&self, table: &str, row: &Row) -> StorageResult<()>;
    /// Writes `data` into every matching row and returns the affected count.
    fn update(&self, table: &str, data: &Row, filter: &Filter) -> StorageResult<usize>;
    /// Removes every matching row and returns the affected count.
    fn delete(&self, table: &str, filter: &Filter) -> StorageResult<usize>;

    /// Schema-migration primitives, if this backend has any.
    fn migrator(&self) -> Option<&dyn Migrator> {
        None
    }

    /// Runs `work` so that an `Err` result rolls back every write it made.
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StorageError>;
}

/// Column declaration for table creation and column addition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable,
        }
    }
}

/// Index declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Schema-migration primitives for lazily created auxiliary tables.
pub trait Migrator {
    fn has_table(&self, table: &str) -> StorageResult<bool>;
    fn create_table(&self, table: &str, columns: &[ColumnDef]) -> StorageResult<()>;
    fn has_column(&self, table: &str, column: &str) -> StorageResult<bool>;
    fn add_column(&self, table: &str, column: &ColumnDef) -> StorageResult<()>;
    fn has_index(&self, table: &str, index: &str) -> StorageResult<bool>;
    fn create_index(&self, table: &str, index: &IndexDef) -> StorageResult<()>;
}
