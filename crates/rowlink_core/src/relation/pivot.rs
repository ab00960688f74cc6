//! Pivot table management for many-to-many relations.
//!
//! # Responsibility
//! - Derive pivot table names and column/index shapes from relation descriptors.
//! - Create or extend pivot tables through the storage migrator, once per
//!   table and column set.
//!
//! # Invariants
//! - Default pivot names sort both table names, so either side derives the same name.
//! - Syncing never drops or retypes existing columns.
//! - Both sides of a relation may share one pivot table; a side declaring
//!   columns the cache has not seen syncs again.
//! - The synced-table cache is not thread-safe; callers serialize access.

use super::{EngineError, EngineResult};
use crate::config::EngineConfig;
use crate::schema::{EntitySchema, FieldType, RelationDef};
use crate::storage::{ColumnDef, IndexDef, Migrator, Storage, StorageError};
use log::info;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Table, columns and indexes a pivot table must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotSchema {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl PivotSchema {
    /// Derives the pivot shape for `relation` declared on `entity`.
    pub fn derive(
        entity: &EntitySchema,
        related: &EntitySchema,
        relation: &RelationDef,
        default_key_type: FieldType,
    ) -> Self {
        let table = pivot_table_name(entity, related, relation);
        let mut columns = Vec::new();

        for (pivot_column, source) in relation.pivot_keys.foreign.iter().zip(&relation.foreign_key) {
            let field_type = entity.field_type(source).unwrap_or(default_key_type);
            columns.push(ColumnDef::new(pivot_column, field_type, false));
        }
        for (pivot_column, source) in relation.pivot_keys.related.iter().zip(&relation.schema_key) {
            let field_type = related.field_type(source).unwrap_or(default_key_type);
            columns.push(ColumnDef::new(pivot_column, field_type, false));
        }
        for field in &relation.pivot_fields {
            columns.push(ColumnDef::new(&field.name, field.resolved_type(), true));
        }

        let all_keys: Vec<String> = relation
            .pivot_keys
            .foreign
            .iter()
            .chain(&relation.pivot_keys.related)
            .cloned()
            .collect();
        let indexes = vec![
            IndexDef {
                name: format!("uniq_{table}_keys"),
                columns: all_keys,
                unique: true,
            },
            IndexDef {
                name: format!("idx_{table}_foreign"),
                columns: relation.pivot_keys.foreign.clone(),
                unique: false,
            },
            IndexDef {
                name: format!("idx_{table}_related"),
                columns: relation.pivot_keys.related.clone(),
                unique: false,
            },
        ];

        Self {
            table,
            columns,
            indexes,
        }
    }

    /// Columns fetched from the pivot table during a join.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }
}

/// Explicit pivot name, or both table names sorted and joined by `_`.
pub fn pivot_table_name(
    entity: &EntitySchema,
    related: &EntitySchema,
    relation: &RelationDef,
) -> String {
    if let Some(table) = relation.pivot_table.as_deref() {
        return table.to_string();
    }
    let mut tables = [entity.table.as_str(), related.table.as_str()];
    tables.sort_unstable();
    tables.join("_")
}

/// Tracks which pivot tables, and which of their columns, have been synced
/// through this engine.
#[derive(Debug, Default)]
pub struct PivotManager {
    synced: RefCell<BTreeMap<String, BTreeSet<String>>>,
}

impl PivotManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_synced(&self, table: &str) -> bool {
        self.synced.borrow().contains_key(table)
    }

    fn covers(&self, schema: &PivotSchema) -> bool {
        self.synced.borrow().get(&schema.table).is_some_and(|columns| {
            schema
                .columns
                .iter()
                .all(|column| columns.contains(&column.name))
        })
    }

    /// Syncs the pivot table on first use and returns its shape.
    pub fn ensure<S: Storage>(
        &self,
        store: &S,
        config: &EngineConfig,
        entity: &EntitySchema,
        related: &EntitySchema,
        relation: &RelationDef,
    ) -> EngineResult<PivotSchema> {
        let schema = PivotSchema::derive(entity, related, relation, config.default_key_type);
        if !self.covers(&schema) {
            self.sync(store, &schema)?;
        }
        Ok(schema)
    }

    /// Creates the pivot table or adds missing columns, then ensures indexes.
    pub fn sync<S: Storage>(&self, store: &S, schema: &PivotSchema) -> EngineResult<()> {
        let started_at = Instant::now();
        let migrator = store
            .migrator()
            .ok_or(EngineError::Storage(StorageError::Unsupported(
                "pivot schema migration",
            )))?;

        let (created, added) = sync_columns(migrator, schema)?;
        let mut indexes = 0;
        for index in &schema.indexes {
            if !migrator.has_index(&schema.table, &index.name)? {
                migrator.create_index(&schema.table, index)?;
                indexes += 1;
            }
        }

        self.synced
            .borrow_mut()
            .entry(schema.table.clone())
            .or_default()
            .extend(schema.column_names());
        info!(
            "event=pivot_sync module=relation status=ok table={} created={} columns_added={} indexes_created={} duration_ms={}",
            schema.table,
            created,
            added,
            indexes,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

fn sync_columns(migrator: &dyn Migrator, schema: &PivotSchema) -> EngineResult<(bool, usize)> {
    if !migrator.has_table(&schema.table)? {
        migrator.create_table(&schema.table, &schema.columns)?;
        return Ok((true, 0));
    }

    let mut added = 0;
    for column in &schema.columns {
        if !migrator.has_column(&schema.table, &column.name)? {
            // Added columns are nullable so existing rows stay valid.
            let column = ColumnDef::new(&column.name, column.field_type, true);
            migrator.add_column(&schema.table, &column)?;
            added += 1;
        }
    }
    Ok((false, added))
}

#[cfg(test)]
mod tests {
    use super::{pivot_table_name, PivotManager, PivotSchema};
    use crate::schema::{EntitySchema, FieldType, PivotField, RelationDef};
    use crate::storage::ColumnDef;

    fn tags_relation() -> RelationDef {
        RelationDef::many_to_many("tags")
            .foreign_key(["id"])
            .schema_key(["id"])
            .pivot_keys(["post_id"], ["tag_id"])
            .pivot_field(PivotField::inferred("created_at"))
            .pivot_field(PivotField::typed("weight", FieldType::Float))
    }

    #[test]
    fn default_name_sorts_table_names() {
        let posts = EntitySchema::new("posts");
        let tags = EntitySchema::new("tags");
        let relation = tags_relation();
        assert_eq!(pivot_table_name(&posts, &tags, &relation), "posts_tags");
        assert_eq!(pivot_table_name(&tags, &posts, &relation), "posts_tags");
        assert_eq!(
            pivot_table_name(&posts, &tags, &relation.pivot_table("post_links")),
            "post_links"
        );
    }

    #[test]
    fn derive_types_keys_from_owning_fields() {
        let posts = EntitySchema::new("posts").field("id", FieldType::Uuid);
        let tags = EntitySchema::new("tags");
        let schema = PivotSchema::derive(&posts, &tags, &tags_relation(), FieldType::UnsignedInteger);

        let types: Vec<(String, FieldType, bool)> = schema
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.field_type, column.nullable))
            .collect();
        assert_eq!(
            types,
            vec![
                ("post_id".to_string(), FieldType::Uuid, false),
                ("tag_id".to_string(), FieldType::UnsignedInteger, false),
                ("created_at".to_string(), FieldType::Timestamp, true),
                ("weight".to_string(), FieldType::Float, true),
            ]
        );
        assert_eq!(schema.indexes[0].name, "uniq_posts_tags_keys");
        assert!(schema.indexes[0].unique);
        assert_eq!(schema.indexes[0].columns, vec!["post_id", "tag_id"]);
    }

    #[test]
    fn cache_covers_only_the_columns_already_synced() {
        let posts = EntitySchema::new("posts");
        let tags = EntitySchema::new("tags");
        let with_weight = PivotSchema::derive(&posts, &tags, &tags_relation(), FieldType::Integer);
        let mut keys_only = with_weight.clone();
        keys_only.columns.truncate(2);

        let manager = PivotManager::new();
        assert!(!manager.covers(&keys_only));
        manager
            .synced
            .borrow_mut()
            .entry(keys_only.table.clone())
            .or_default()
            .extend(keys_only.column_names());

        assert!(manager.is_synced("posts_tags"));
        assert!(manager.covers(&keys_only));
        assert!(!manager.covers(&with_weight));

        let mut reordered = keys_only.clone();
        reordered.columns.reverse();
        assert!(manager.covers(&reordered));
        assert_eq!(
            reordered.columns[0],
            ColumnDef::new("tag_id", FieldType::Integer, false)
        );
    }
}
