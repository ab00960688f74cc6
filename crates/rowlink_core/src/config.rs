//! Engine tuning knobs.
//!
//! Loading these from files or the environment is the caller's concern;
//! `EngineConfig` only derives `serde` traits so any settings loader can
//! produce it.

use crate::schema::FieldType;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RELATION_DEPTH: usize = 16;
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Relation paths nesting deeper than this are dropped.
    pub max_relation_depth: usize,
    /// Nested cascade deletes deeper than this abort the delete.
    pub max_cascade_depth: usize,
    /// Pivot key column type when the owning entity does not declare the field.
    pub default_key_type: FieldType,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_relation_depth: DEFAULT_MAX_RELATION_DEPTH,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
            default_key_type: FieldType::UnsignedInteger,
        }
    }
}
