//! Entity schemas and relation descriptors.
//!
//! # Responsibility
//! - Describe entity tables, their fields and their soft-delete policy.
//! - Hold relation descriptors and validate them before any load runs.
//!
//! # Invariants
//! - Table, column and relation names match `^[A-Za-z_][A-Za-z0-9_]*$`.
//! - Every entity has a non-empty primary key.
//! - A resolved registry never contains a malformed relation descriptor.

use crate::filter::Filter;
use crate::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod registry;
pub mod relation;

pub use registry::{SchemaError, SchemaRegistry, SchemaResult};
pub use relation::{CascadeType, PivotField, PivotKeys, RelationDef, RelationType};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Returns whether `value` is safe to use as a table, column or index name.
pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

/// Logical column type used for schema introspection and pivot migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    UnsignedInteger,
    Float,
    Text,
    Bool,
    Bytes,
    /// Epoch milliseconds.
    Timestamp,
    /// Canonical hyphenated text.
    Uuid,
}

/// One declared entity field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

/// How an entity marks rows as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftDeleteMode {
    /// Integer flag, `1` when deleted.
    Flag,
    /// Epoch milliseconds, null while live.
    Timestamp,
}

/// Soft-delete configuration for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDelete {
    pub column: String,
    pub mode: SoftDeleteMode,
}

impl SoftDelete {
    pub fn flag(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            mode: SoftDeleteMode::Flag,
        }
    }

    pub fn timestamp(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            mode: SoftDeleteMode::Timestamp,
        }
    }

    /// Filter matching rows that are still live.
    pub fn live_filter(&self) -> Filter {
        match self.mode {
            SoftDeleteMode::Flag => Filter::Or(vec![
                Filter::is_null(self.column.as_str()),
                Filter::eq(self.column.as_str(), 0),
            ]),
            SoftDeleteMode::Timestamp => Filter::is_null(self.column.as_str()),
        }
    }

    /// Value written into `column` when a row is soft-deleted.
    pub fn deleted_marker(&self) -> Value {
        match self.mode {
            SoftDeleteMode::Flag => Value::Int(1),
            SoftDeleteMode::Timestamp => Value::Int(now_epoch_ms()),
        }
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

/// Declared shape of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    /// Registry name used in relation descriptors and service calls.
    pub name: String,
    /// Physical table name.
    pub table: String,
    pub primary_key: Vec<String>,
    pub fields: BTreeMap<String, FieldDef>,
    pub relations: BTreeMap<String, RelationDef>,
    pub soft_delete: Option<SoftDelete>,
}

impl EntitySchema {
    /// Creates a schema whose table name equals the entity name and whose
    /// primary key is `id`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: name.clone(),
            name,
            primary_key: vec!["id".to_string()],
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
            soft_delete: None,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.field_def(name, field_type, false)
    }

    pub fn nullable_field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.field_def(name, field_type, true)
    }

    fn field_def(mut self, name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        let name = name.into();
        self.fields.insert(
            name.clone(),
            FieldDef {
                name,
                field_type,
                nullable,
            },
        );
        self
    }

    pub fn relation(mut self, name: impl Into<String>, relation: RelationDef) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    pub fn soft_delete(mut self, soft_delete: SoftDelete) -> Self {
        self.soft_delete = Some(soft_delete);
        self
    }

    pub fn field_type(&self, column: &str) -> Option<FieldType> {
        self.fields.get(column).map(|field| field.field_type)
    }

    /// Filter excluding soft-deleted rows, `Filter::All` without soft delete.
    pub fn live_filter(&self) -> Filter {
        self.soft_delete
            .as_ref()
            .map_or(Filter::All, SoftDelete::live_filter)
    }
}
