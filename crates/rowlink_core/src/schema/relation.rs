//! Relation descriptors.
//!
//! # Invariants
//! - `foreign_key` and `schema_key` have equal length once resolved.
//! - Pivot settings are only meaningful for `RelationType::ManyToMany`.

use super::FieldType;
use crate::filter::Filter;
use serde::{Deserialize, Serialize};

/// Shape of the value a relation writes back into the parent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Nested map (or null / empty map on no match).
    Single,
    /// Related fields flattened into the parent row.
    SingleMerge,
    /// List of related rows matched on `schema_key`.
    Many,
    /// List of related rows joined through a pivot table.
    ManyToMany,
}

/// Delete policy applied to related rows when a parent is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeType {
    Restrict,
    SetNull,
    Cascade,
}

impl CascadeType {
    /// Parses the free-text form (`"restrict"`, `"set null"`, `"CASCADE"`...).
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase().replace(['_', '-'], " ");
        match normalized.split_whitespace().collect::<Vec<_>>().join(" ").as_str() {
            "RESTRICT" => Some(Self::Restrict),
            "SET NULL" | "SETNULL" => Some(Self::SetNull),
            "CASCADE" => Some(Self::Cascade),
            _ => None,
        }
    }
}

/// Pivot-side key columns of a many-to-many relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PivotKeys {
    /// Pivot columns holding the parent's `foreign_key` values.
    pub foreign: Vec<String>,
    /// Pivot columns holding the related entity's `schema_key` values.
    pub related: Vec<String>,
}

/// Extra payload column on a pivot table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotField {
    pub name: String,
    /// Explicit column type. `None` falls back to the name-suffix heuristic.
    pub field_type: Option<FieldType>,
}

impl PivotField {
    pub fn typed(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type: Some(field_type),
        }
    }

    pub fn inferred(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: None,
        }
    }

    /// Declared type, else `_at` ⇒ timestamp, `_id` ⇒ unsigned integer, else text.
    pub fn resolved_type(&self) -> FieldType {
        if let Some(field_type) = self.field_type {
            return field_type;
        }
        if self.name.ends_with("_at") {
            FieldType::Timestamp
        } else if self.name.ends_with("_id") {
            FieldType::UnsignedInteger
        } else {
            FieldType::Text
        }
    }
}

/// One named relation declared on an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDef {
    pub kind: RelationType,
    /// Related entity name.
    pub schema: String,
    /// Parent-side columns. Empty means the parent's primary key.
    pub foreign_key: Vec<String>,
    /// Related-side columns. Empty means the related entity's primary key.
    pub schema_key: Vec<String>,
    /// Default projection on the related entity. Empty means all columns.
    pub fields: Vec<String>,
    /// Static extra filter on related rows.
    pub filter: Filter,
    pub nullable: bool,
    pub cascade: Option<CascadeType>,
    /// Free-text cascade policy, used when `cascade` is unset.
    pub cascade_text: Option<String>,
    /// Explicit pivot table name for many-to-many relations.
    pub pivot_table: Option<String>,
    pub pivot_keys: PivotKeys,
    pub pivot_fields: Vec<PivotField>,
    pub pivot_filter: Filter,
}

impl RelationDef {
    pub fn new(kind: RelationType, schema: impl Into<String>) -> Self {
        Self {
            kind,
            schema: schema.into(),
            foreign_key: Vec::new(),
            schema_key: Vec::new(),
            fields: Vec::new(),
            filter: Filter::All,
            nullable: false,
            cascade: None,
            cascade_text: None,
            pivot_table: None,
            pivot_keys: PivotKeys::default(),
            pivot_fields: Vec::new(),
            pivot_filter: Filter::All,
        }
    }

    pub fn single(schema: impl Into<String>) -> Self {
        Self::new(RelationType::Single, schema)
    }

    pub fn single_merge(schema: impl Into<String>) -> Self {
        Self::new(RelationType::SingleMerge, schema)
    }

    pub fn many(schema: impl Into<String>) -> Self {
        Self::new(RelationType::Many, schema)
    }

    pub fn many_to_many(schema: impl Into<String>) -> Self {
        Self::new(RelationType::ManyToMany, schema)
    }

    pub fn foreign_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn schema_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn cascade(mut self, cascade: CascadeType) -> Self {
        self.cascade = Some(cascade);
        self
    }

    pub fn cascade_text(mut self, value: impl Into<String>) -> Self {
        self.cascade_text = Some(value.into());
        self
    }

    pub fn pivot_table(mut self, table: impl Into<String>) -> Self {
        self.pivot_table = Some(table.into());
        self
    }

    pub fn pivot_keys<I, J, S, T>(mut self, foreign: I, related: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.pivot_keys = PivotKeys {
            foreign: foreign.into_iter().map(Into::into).collect(),
            related: related.into_iter().map(Into::into).collect(),
        };
        self
    }

    pub fn pivot_field(mut self, field: PivotField) -> Self {
        self.pivot_fields.push(field);
        self
    }

    pub fn pivot_filter(mut self, filter: Filter) -> Self {
        self.pivot_filter = filter;
        self
    }

    pub fn is_many_to_many(&self) -> bool {
        self.kind == RelationType::ManyToMany
    }
}

#[cfg(test)]
mod tests {
    use super::{CascadeType, PivotField};
    use crate::schema::FieldType;

    #[test]
    fn cascade_text_is_case_and_separator_insensitive() {
        assert_eq!(CascadeType::parse("restrict"), Some(CascadeType::Restrict));
        assert_eq!(CascadeType::parse(" set null "), Some(CascadeType::SetNull));
        assert_eq!(CascadeType::parse("SET_NULL"), Some(CascadeType::SetNull));
        assert_eq!(CascadeType::parse("Cascade"), Some(CascadeType::Cascade));
        assert_eq!(CascadeType::parse("no action"), None);
    }

    #[test]
    fn pivot_field_type_prefers_explicit_declaration() {
        assert_eq!(
            PivotField::typed("created_at", FieldType::Text).resolved_type(),
            FieldType::Text
        );
        assert_eq!(
            PivotField::inferred("created_at").resolved_type(),
            FieldType::Timestamp
        );
        assert_eq!(
            PivotField::inferred("granted_by_id").resolved_type(),
            FieldType::UnsignedInteger
        );
        assert_eq!(PivotField::inferred("role").resolved_type(), FieldType::Text);
    }
}
