//! Relational loading and referential integrity for row-oriented storage.
//!
//! Entities are described by [`schema::EntitySchema`] and registered in a
//! [`schema::SchemaRegistry`]. [`service::EntityService`] reads rows with
//! requested relations attached via in-process hash joins, and deletes rows
//! honoring each relation's cascade policy.

pub mod config;
pub mod db;
pub mod filter;
pub mod logging;
pub mod relation;
pub mod schema;
pub mod service;
pub mod storage;
pub mod value;

pub use config::EngineConfig;
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use filter::{Filter, FindOptions, OrderBy};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use relation::{EngineError, EngineResult};
pub use schema::{
    CascadeType, EntitySchema, FieldType, PivotField, RelationDef, RelationType, SchemaError,
    SchemaRegistry, SoftDelete,
};
pub use service::{EntityService, FindQuery, Page};
pub use storage::{MemoryStorage, SqliteStorage, Storage, StorageError, StorageResult};
pub use value::{row, Row, Value};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
