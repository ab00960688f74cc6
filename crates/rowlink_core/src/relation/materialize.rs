//! Recursive relation materialization.
//!
//! # Responsibility
//! - Fetch every requested relation of one level with a single query.
//! - Recurse into the fetched rows before attaching them to their parents.
//! - Attach results by relation kind and strip join-only columns.
//!
//! # Invariants
//! - Hash-join indexes are built before recursion strips temporary keys.
//! - Parents without a match get the relation's default, never a stale value.
//! - `SingleMerge` copies fields into the parent and never writes a default.

use super::index::{build_relation_map_many, build_relation_map_single};
use super::keys::{build_composite_filter, collect_key_tuples, composite_key};
use super::path::{RelationNode, RelationTree};
use super::plan::plan_related_fields;
use super::{EngineResult, RelationContext};
use crate::schema::{EntitySchema, RelationDef, RelationType};
use crate::storage::Storage;
use crate::value::{Row, Value};
use log::debug;
use std::collections::HashMap;
use std::time::Instant;

enum RelationIndex {
    Single(HashMap<String, usize>),
    Many(HashMap<String, Vec<usize>>),
}

impl<S: Storage> RelationContext<'_, S> {
    /// Loads `tree` into `rows`, then removes `temporary` columns from them.
    pub(crate) fn materialize(
        &self,
        entity: &EntitySchema,
        rows: &mut [Row],
        tree: &RelationTree,
        temporary: &[String],
    ) -> EngineResult<()> {
        if !rows.is_empty() {
            for (name, node) in tree {
                let Some(relation) = entity.relations.get(name) else {
                    continue;
                };
                let related = self.registry.entity(&relation.schema)?;
                if relation.is_many_to_many() {
                    self.load_many_to_many(entity, name, relation, related, node, rows)?;
                } else {
                    self.load_relation(entity, name, relation, related, node, rows)?;
                }
            }
        }
        strip_columns(rows, temporary);
        Ok(())
    }

    fn load_relation(
        &self,
        entity: &EntitySchema,
        name: &str,
        relation: &RelationDef,
        related: &EntitySchema,
        node: &RelationNode,
        rows: &mut [Row],
    ) -> EngineResult<()> {
        let started_at = Instant::now();
        let tuples = collect_key_tuples(rows, &relation.foreign_key);
        let Some(key_filter) = build_composite_filter(&relation.schema_key, &tuples) else {
            apply_default(rows, name, relation);
            debug!(
                "event=relation_load module=relation status=skip entity={} relation={} reason=no_parent_keys",
                entity.name, name
            );
            return Ok(());
        };

        let plan = plan_related_fields(relation, node, related);
        let filter = key_filter
            .and(relation.filter.clone())
            .and(related.live_filter());
        let mut items = self.store.find(&related.table, &filter, &plan.options())?;
        if items.is_empty() {
            apply_default(rows, name, relation);
            debug!(
                "event=relation_load module=relation status=ok entity={} relation={} parents={} related=0 duration_ms={}",
                entity.name,
                name,
                rows.len(),
                started_at.elapsed().as_millis()
            );
            return Ok(());
        }

        let index = match relation.kind {
            RelationType::Many => {
                RelationIndex::Many(build_relation_map_many(&items, &relation.schema_key))
            }
            _ => RelationIndex::Single(build_relation_map_single(&items, &relation.schema_key)),
        };
        self.materialize(related, &mut items, &node.children, &plan.temporary)?;

        for row in rows.iter_mut() {
            let key = composite_key(row, &relation.foreign_key);
            match (&index, relation.kind) {
                (RelationIndex::Single(index), RelationType::SingleMerge) => {
                    if let Some(&position) = key.as_ref().and_then(|key| index.get(key)) {
                        for (column, value) in &items[position] {
                            row.insert(column.clone(), value.clone());
                        }
                    }
                }
                (RelationIndex::Single(index), _) => {
                    let value = key
                        .as_ref()
                        .and_then(|key| index.get(key))
                        .map(|&position| Value::Map(items[position].clone()))
                        .unwrap_or_else(|| default_value(relation));
                    row.insert(name.to_string(), value);
                }
                (RelationIndex::Many(index), _) => {
                    let value = match key.as_ref().and_then(|key| index.get(key)) {
                        Some(positions) => Value::List(
                            positions
                                .iter()
                                .map(|&position| Value::Map(items[position].clone()))
                                .collect(),
                        ),
                        None => default_value(relation),
                    };
                    row.insert(name.to_string(), value);
                }
            }
        }

        debug!(
            "event=relation_load module=relation status=ok entity={} relation={} parents={} related={} duration_ms={}",
            entity.name,
            name,
            rows.len(),
            items.len(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

/// Value written when a parent has no related rows.
pub(crate) fn default_value(relation: &RelationDef) -> Value {
    if relation.nullable {
        return Value::Null;
    }
    match relation.kind {
        RelationType::Many | RelationType::ManyToMany => Value::List(Vec::new()),
        RelationType::Single | RelationType::SingleMerge => Value::Map(Row::new()),
    }
}

/// Writes the empty-result default into every row.
pub(crate) fn apply_default(rows: &mut [Row], name: &str, relation: &RelationDef) {
    if relation.kind == RelationType::SingleMerge {
        return;
    }
    let value = default_value(relation);
    for row in rows.iter_mut() {
        row.insert(name.to_string(), value.clone());
    }
}

pub(crate) fn strip_columns(rows: &mut [Row], columns: &[String]) {
    if columns.is_empty() {
        return;
    }
    for row in rows.iter_mut() {
        for column in columns {
            row.remove(column);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_default, default_value, strip_columns};
    use crate::schema::RelationDef;
    use crate::value::{row, Row, Value};

    #[test]
    fn defaults_follow_kind_and_nullability() {
        assert_eq!(default_value(&RelationDef::many("c")), Value::List(Vec::new()));
        assert_eq!(default_value(&RelationDef::single("c")), Value::Map(Row::new()));
        assert_eq!(
            default_value(&RelationDef::many_to_many("c").nullable(true)),
            Value::Null
        );
    }

    #[test]
    fn single_merge_default_writes_nothing() {
        let mut rows = vec![row([("id", 1)])];
        apply_default(&mut rows, "profile", &RelationDef::single_merge("profiles"));
        assert_eq!(rows, vec![row([("id", 1)])]);
    }

    #[test]
    fn strip_removes_only_listed_columns() {
        let mut rows = vec![row([("id", 1), ("parent_id", 2)])];
        strip_columns(&mut rows, &["parent_id".to_string()]);
        assert_eq!(rows, vec![row([("id", 1)])]);
    }
}
