//! Cascade-aware deletes.
//!
//! # Responsibility
//! - Apply each relation's Restrict/SetNull/Cascade policy before the parent
//!   rows themselves are removed or soft-deleted.
//!
//! # Invariants
//! - Callers run this inside `Storage::atomically`; a Restrict failure at any
//!   depth leaves no partial effect.
//! - Soft-deleted related rows never block a Restrict policy.
//! - SetNull only applies to `Many` relations; the foreign key of a single
//!   relation lives on the parent that is being deleted.

use super::keys::{build_composite_filter, collect_key_tuples};
use super::{EngineError, EngineResult, RelationContext};
use crate::filter::{Filter, FindOptions};
use crate::schema::{CascadeType, EntitySchema, RelationDef, RelationType};
use crate::storage::Storage;
use crate::value::{Row, Value};
use log::{debug, info, warn};

impl<S: Storage> RelationContext<'_, S> {
    /// Deletes live rows of `entity` matching `filter`, applying cascades first.
    ///
    /// Returns the number of `entity` rows deleted at this level.
    pub(crate) fn delete_cascading(
        &self,
        entity: &EntitySchema,
        filter: &Filter,
        depth: usize,
    ) -> EngineResult<usize> {
        if depth > self.config.max_cascade_depth {
            warn!(
                "event=cascade_apply module=relation status=error entity={} depth={} reason=depth_exceeded",
                entity.name, depth
            );
            return Err(EngineError::CascadeDepthExceeded {
                entity: entity.name.clone(),
                depth,
            });
        }

        let target = filter.clone().and(entity.live_filter());
        let policies: Vec<(&String, &RelationDef, CascadeType)> = entity
            .relations
            .iter()
            .filter_map(|(name, relation)| relation.cascade.map(|policy| (name, relation, policy)))
            .collect();

        if !policies.is_empty() {
            let mut key_columns: Vec<String> = Vec::new();
            for (_, relation, _) in &policies {
                for column in &relation.foreign_key {
                    if !key_columns.contains(column) {
                        key_columns.push(column.clone());
                    }
                }
            }
            let targets = self.store.find(
                &entity.table,
                &target,
                &FindOptions::with_fields(key_columns),
            )?;
            if targets.is_empty() {
                return Ok(0);
            }
            for (name, relation, policy) in policies {
                self.apply_policy(entity, name, relation, policy, &targets, depth)?;
            }
        }

        let deleted = match &entity.soft_delete {
            Some(soft_delete) => {
                let marker: Row = [(soft_delete.column.clone(), soft_delete.deleted_marker())]
                    .into_iter()
                    .collect();
                self.store.update(&entity.table, &marker, &target)?
            }
            None => self.store.delete(&entity.table, &target)?,
        };
        info!(
            "event=entity_delete module=relation status=ok entity={} deleted={} soft={} depth={}",
            entity.name,
            deleted,
            entity.soft_delete.is_some(),
            depth
        );
        Ok(deleted)
    }

    fn apply_policy(
        &self,
        entity: &EntitySchema,
        name: &str,
        relation: &RelationDef,
        policy: CascadeType,
        targets: &[Row],
        depth: usize,
    ) -> EngineResult<()> {
        let related = self.registry.entity(&relation.schema)?;
        let tuples = collect_key_tuples(targets, &relation.foreign_key);

        if relation.is_many_to_many() {
            let Some(links) = build_composite_filter(&relation.pivot_keys.foreign, &tuples) else {
                return Ok(());
            };
            let pivot = self
                .pivots
                .ensure(self.store, self.config, entity, related, relation)?;
            match policy {
                CascadeType::Restrict => {
                    self.restrict(entity, name, &pivot.table, &links)?;
                }
                CascadeType::SetNull | CascadeType::Cascade => {
                    let removed = self.store.delete(&pivot.table, &links)?;
                    debug!(
                        "event=cascade_apply module=relation status=ok entity={} relation={} policy={:?} pivot={} removed={}",
                        entity.name, name, policy, pivot.table, removed
                    );
                }
            }
            return Ok(());
        }

        let Some(children) = build_composite_filter(&relation.schema_key, &tuples) else {
            return Ok(());
        };
        match policy {
            CascadeType::Restrict => {
                let live = children.and(related.live_filter());
                self.restrict(entity, name, &related.table, &live)?;
            }
            CascadeType::SetNull => {
                if relation.kind != RelationType::Many {
                    debug!(
                        "event=cascade_apply module=relation status=skip entity={} relation={} policy=SetNull reason=not_many",
                        entity.name, name
                    );
                    return Ok(());
                }
                let cleared: Row = relation
                    .schema_key
                    .iter()
                    .map(|column| (column.clone(), Value::Null))
                    .collect();
                let live = children.and(related.live_filter());
                let updated = self.store.update(&related.table, &cleared, &live)?;
                debug!(
                    "event=cascade_apply module=relation status=ok entity={} relation={} policy=SetNull updated={}",
                    entity.name, name, updated
                );
            }
            CascadeType::Cascade => {
                let removed = self.delete_cascading(related, &children, depth + 1)?;
                debug!(
                    "event=cascade_apply module=relation status=ok entity={} relation={} policy=Cascade removed={}",
                    entity.name, name, removed
                );
            }
        }
        Ok(())
    }

    fn restrict(
        &self,
        entity: &EntitySchema,
        name: &str,
        table: &str,
        filter: &Filter,
    ) -> EngineResult<()> {
        let options = FindOptions {
            limit: Some(1),
            ..FindOptions::default()
        };
        if self.store.find(table, filter, &options)?.is_empty() {
            return Ok(());
        }
        warn!(
            "event=cascade_restrict module=relation status=blocked entity={} relation={} table={}",
            entity.name, name, table
        );
        Err(EngineError::CascadeRestrict {
            entity: entity.name.clone(),
            relation: name.to_string(),
            related: table.to_string(),
        })
    }
}
