//! Entity schema registry and relation descriptor validation.
//!
//! # Responsibility
//! - Own every registered `EntitySchema`.
//! - Resolve relation defaults and reject malformed descriptors before any
//!   relation is loaded.
//!
//! # Invariants
//! - Entity names are unique.
//! - After `resolve`, every relation has explicit `foreign_key`/`schema_key`
//!   of equal length and an explicit cascade policy when one was declared.
//! - Many-to-many relations only exist on registries resolved against a
//!   migratable backend.

use super::relation::{CascadeType, RelationDef};
use super::{is_valid_identifier, EntitySchema};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Registration-time schema errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    DuplicateEntity(String),
    UnknownEntity(String),
    InvalidIdentifier {
        entity: String,
        value: String,
    },
    EmptyPrimaryKey(String),
    UnknownRelatedEntity {
        entity: String,
        relation: String,
        related: String,
    },
    KeyLengthMismatch {
        entity: String,
        relation: String,
        foreign_key: usize,
        schema_key: usize,
    },
    UnknownCascade {
        entity: String,
        relation: String,
        value: String,
    },
    MissingPivotKeys {
        entity: String,
        relation: String,
    },
    PivotKeyLengthMismatch {
        entity: String,
        relation: String,
        side: &'static str,
        expected: usize,
        actual: usize,
    },
    DuplicatePivotColumn {
        entity: String,
        relation: String,
        column: String,
    },
    /// Many-to-many needs pivot migration, which the backend cannot do.
    ManyToManyUnsupported {
        entity: String,
        relation: String,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateEntity(name) => write!(f, "entity already registered: {name}"),
            Self::UnknownEntity(name) => write!(f, "entity not registered: {name}"),
            Self::InvalidIdentifier { entity, value } => {
                write!(f, "invalid identifier `{value}` in entity `{entity}`")
            }
            Self::EmptyPrimaryKey(name) => write!(f, "entity `{name}` has no primary key"),
            Self::UnknownRelatedEntity {
                entity,
                relation,
                related,
            } => write!(
                f,
                "relation `{entity}.{relation}` targets unregistered entity `{related}`"
            ),
            Self::KeyLengthMismatch {
                entity,
                relation,
                foreign_key,
                schema_key,
            } => write!(
                f,
                "relation `{entity}.{relation}` has {foreign_key} foreign key column(s) but {schema_key} schema key column(s)"
            ),
            Self::UnknownCascade {
                entity,
                relation,
                value,
            } => write!(
                f,
                "relation `{entity}.{relation}` has unknown cascade policy `{value}`"
            ),
            Self::MissingPivotKeys { entity, relation } => write!(
                f,
                "many-to-many relation `{entity}.{relation}` requires foreign and related pivot keys"
            ),
            Self::PivotKeyLengthMismatch {
                entity,
                relation,
                side,
                expected,
                actual,
            } => write!(
                f,
                "many-to-many relation `{entity}.{relation}` expects {expected} {side} pivot key(s), got {actual}"
            ),
            Self::DuplicatePivotColumn {
                entity,
                relation,
                column,
            } => write!(
                f,
                "many-to-many relation `{entity}.{relation}` declares pivot column `{column}` twice"
            ),
            Self::ManyToManyUnsupported { entity, relation } => write!(
                f,
                "many-to-many relation `{entity}.{relation}` requires a storage backend with schema migration"
            ),
        }
    }
}

impl Error for SchemaError {}

/// Registry of entity schemas keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, EntitySchema>,
    resolved: bool,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one entity after checking its own declarations.
    ///
    /// Cross-entity checks run in `resolve`, so entities may reference each
    /// other (or themselves) regardless of registration order.
    pub fn register(&mut self, schema: EntitySchema) -> SchemaResult<()> {
        let entity = schema.name.clone();
        if !is_valid_identifier(&entity) {
            return Err(SchemaError::InvalidIdentifier {
                value: entity.clone(),
                entity,
            });
        }
        if self.entities.contains_key(&entity) {
            return Err(SchemaError::DuplicateEntity(entity));
        }
        if schema.primary_key.is_empty() {
            return Err(SchemaError::EmptyPrimaryKey(entity));
        }

        let mut identifiers: Vec<&str> = vec![schema.table.as_str()];
        identifiers.extend(schema.primary_key.iter().map(String::as_str));
        identifiers.extend(schema.fields.keys().map(String::as_str));
        if let Some(soft_delete) = &schema.soft_delete {
            identifiers.push(soft_delete.column.as_str());
        }
        for (name, relation) in &schema.relations {
            identifiers.push(name.as_str());
            identifiers.extend(relation.foreign_key.iter().map(String::as_str));
            identifiers.extend(relation.schema_key.iter().map(String::as_str));
            identifiers.extend(relation.pivot_keys.foreign.iter().map(String::as_str));
            identifiers.extend(relation.pivot_keys.related.iter().map(String::as_str));
            identifiers.extend(relation.pivot_fields.iter().map(|field| field.name.as_str()));
            if let Some(table) = &relation.pivot_table {
                identifiers.push(table.as_str());
            }
        }
        if let Some(invalid) = identifiers.into_iter().find(|value| !is_valid_identifier(value)) {
            return Err(SchemaError::InvalidIdentifier {
                value: invalid.to_string(),
                entity,
            });
        }

        self.entities.insert(entity, schema);
        self.resolved = false;
        Ok(())
    }

    /// Resolves relation defaults and validates every descriptor.
    ///
    /// `migratable` states whether the storage backend supports pivot schema
    /// migration.
    pub fn resolve(&mut self, migratable: bool) -> SchemaResult<()> {
        let mut resolved = BTreeMap::new();
        for (entity_name, entity) in &self.entities {
            for (relation_name, relation) in &entity.relations {
                let relation = self.resolve_relation(entity, relation_name, relation, migratable)?;
                resolved.insert((entity_name.clone(), relation_name.clone()), relation);
            }
        }

        for ((entity_name, relation_name), relation) in resolved {
            if let Some(entity) = self.entities.get_mut(&entity_name) {
                entity.relations.insert(relation_name, relation);
            }
        }
        self.resolved = true;
        Ok(())
    }

    fn resolve_relation(
        &self,
        entity: &EntitySchema,
        relation_name: &str,
        relation: &RelationDef,
        migratable: bool,
    ) -> SchemaResult<RelationDef> {
        let related = self.entities.get(&relation.schema).ok_or_else(|| {
            SchemaError::UnknownRelatedEntity {
                entity: entity.name.clone(),
                relation: relation_name.to_string(),
                related: relation.schema.clone(),
            }
        })?;

        let mut resolved = relation.clone();
        if resolved.foreign_key.is_empty() {
            resolved.foreign_key = entity.primary_key.clone();
        }
        if resolved.schema_key.is_empty() {
            resolved.schema_key = related.primary_key.clone();
        }
        if resolved.foreign_key.len() != resolved.schema_key.len() {
            return Err(SchemaError::KeyLengthMismatch {
                entity: entity.name.clone(),
                relation: relation_name.to_string(),
                foreign_key: resolved.foreign_key.len(),
                schema_key: resolved.schema_key.len(),
            });
        }

        if resolved.cascade.is_none() {
            if let Some(text) = resolved.cascade_text.as_deref() {
                if !text.trim().is_empty() {
                    resolved.cascade = Some(CascadeType::parse(text).ok_or_else(|| {
                        SchemaError::UnknownCascade {
                            entity: entity.name.clone(),
                            relation: relation_name.to_string(),
                            value: text.to_string(),
                        }
                    })?);
                }
            }
        }

        if resolved.is_many_to_many() {
            validate_pivot(entity, relation_name, &resolved, migratable)?;
        }
        Ok(resolved)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn get(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.get(name)
    }

    pub fn entity(&self, name: &str) -> SchemaResult<&EntitySchema> {
        self.get(name)
            .ok_or_else(|| SchemaError::UnknownEntity(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn validate_pivot(
    entity: &EntitySchema,
    relation_name: &str,
    relation: &RelationDef,
    migratable: bool,
) -> SchemaResult<()> {
    if !migratable {
        return Err(SchemaError::ManyToManyUnsupported {
            entity: entity.name.clone(),
            relation: relation_name.to_string(),
        });
    }

    let keys = &relation.pivot_keys;
    if keys.foreign.is_empty() || keys.related.is_empty() {
        return Err(SchemaError::MissingPivotKeys {
            entity: entity.name.clone(),
            relation: relation_name.to_string(),
        });
    }
    for (side, expected, actual) in [
        ("foreign", relation.foreign_key.len(), keys.foreign.len()),
        ("related", relation.schema_key.len(), keys.related.len()),
    ] {
        if expected != actual {
            return Err(SchemaError::PivotKeyLengthMismatch {
                entity: entity.name.clone(),
                relation: relation_name.to_string(),
                side,
                expected,
                actual,
            });
        }
    }

    let mut seen = BTreeSet::new();
    let columns = keys
        .foreign
        .iter()
        .chain(keys.related.iter())
        .chain(relation.pivot_fields.iter().map(|field| &field.name));
    for column in columns {
        if !seen.insert(column.as_str()) {
            return Err(SchemaError::DuplicatePivotColumn {
                entity: entity.name.clone(),
                relation: relation_name.to_string(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}
