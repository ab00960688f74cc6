//! Use-case services.
//!
//! # Responsibility
//! - Expose entity reads and deletes over a storage backend.
//! - Keep callers decoupled from relation-engine internals.

pub mod entity_service;

pub use entity_service::{EntityService, FindQuery, Page};
