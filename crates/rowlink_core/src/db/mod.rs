//! SQLite connection bootstrap.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections for the SQLite storage backend.
//! - Wrap rusqlite transport failures in one error type.
//!
//! # Invariants
//! - Entity tables are owned by the caller; only pivot tables are migrated by
//!   this crate (see `relation::pivot`).

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// Linked SQLite library is older than the minimum this crate relies on.
    UnsupportedSqliteVersion {
        actual: i32,
        minimum: i32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSqliteVersion { actual, minimum } => write!(
                f,
                "sqlite library version {actual} is older than required {minimum}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSqliteVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
