//! Relation loading and referential integrity.
//!
//! # Responsibility
//! - Resolve `with_relation` paths into a per-query relation tree.
//! - Attach related rows with in-process hash joins instead of SQL JOINs.
//! - Manage pivot tables for many-to-many relations.
//! - Apply Restrict/SetNull/Cascade policies when parents are deleted.
//!
//! # Invariants
//! - One storage query per relation per nesting level, never one per row.
//! - Join-only columns added at a level are removed before that level returns.
//! - The engine never spawns threads; every suspension is a storage call.

use crate::config::EngineConfig;
use crate::schema::{SchemaError, SchemaRegistry};
use crate::storage::{Storage, StorageError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod cascade;
pub mod index;
pub mod keys;
pub mod many_to_many;
pub mod materialize;
pub mod path;
pub mod pivot;
pub mod plan;

pub use path::{resolve_relation_paths, RelationNode, RelationTree};
pub use pivot::{PivotManager, PivotSchema};

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by relation loading, cascade deletes and the service facade.
#[derive(Debug)]
pub enum EngineError {
    Schema(SchemaError),
    Storage(StorageError),
    UnknownEntity(String),
    UnknownRelation {
        entity: String,
        relation: String,
    },
    /// A Restrict policy found live related rows; nothing was deleted.
    CascadeRestrict {
        entity: String,
        relation: String,
        related: String,
    },
    CascadeDepthExceeded {
        entity: String,
        depth: usize,
    },
    InvalidPagination {
        page: u64,
        per_page: u64,
    },
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::UnknownEntity(name) => write!(f, "entity not registered: {name}"),
            Self::UnknownRelation { entity, relation } => {
                write!(f, "relation not declared: {entity}.{relation}")
            }
            Self::CascadeRestrict {
                entity,
                relation,
                related,
            } => write!(
                f,
                "cannot delete `{entity}`: relation `{relation}` still has `{related}` rows (restrict)"
            ),
            Self::CascadeDepthExceeded { entity, depth } => write!(
                f,
                "cascade delete exceeded depth {depth} at entity `{entity}`"
            ),
            Self::InvalidPagination { page, per_page } => write!(
                f,
                "invalid pagination page={page} per_page={per_page}; both must be >= 1"
            ),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schema(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SchemaError> for EngineError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<StorageError> for EngineError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

/// Borrowed collaborators shared by one load or delete call.
pub(crate) struct RelationContext<'a, S: Storage> {
    pub store: &'a S,
    pub registry: &'a SchemaRegistry,
    pub config: &'a EngineConfig,
    pub pivots: &'a PivotManager,
}
