//! Many-to-many loading through pivot tables.
//!
//! Three hash-join stages, each backed by one storage query:
//! parent keys to pivot rows, pivot rows to related rows, and the final
//! regroup of related rows per parent with pivot payload attached as
//! `pivot_<field>` columns.

use super::index::build_relation_map_single;
use super::keys::{build_composite_filter, collect_key_tuples, composite_key};
use super::materialize::apply_default;
use super::path::RelationNode;
use super::plan::plan_related_fields;
use super::{EngineResult, RelationContext};
use crate::filter::FindOptions;
use crate::schema::{EntitySchema, RelationDef};
use crate::storage::Storage;
use crate::value::{Row, Value};
use log::debug;
use std::collections::HashMap;
use std::time::Instant;

pub const PIVOT_FIELD_PREFIX: &str = "pivot_";

struct PivotLink {
    related_key: String,
    payload: Row,
}

impl<S: Storage> RelationContext<'_, S> {
    pub(crate) fn load_many_to_many(
        &self,
        entity: &EntitySchema,
        name: &str,
        relation: &RelationDef,
        related: &EntitySchema,
        node: &RelationNode,
        rows: &mut [Row],
    ) -> EngineResult<()> {
        let started_at = Instant::now();
        let parent_tuples = collect_key_tuples(rows, &relation.foreign_key);
        let Some(pivot_filter) =
            build_composite_filter(&relation.pivot_keys.foreign, &parent_tuples)
        else {
            apply_default(rows, name, relation);
            return Ok(());
        };

        let pivot = self
            .pivots
            .ensure(self.store, self.config, entity, related, relation)?;
        let pivot_rows = self.store.find(
            &pivot.table,
            &pivot_filter.and(relation.pivot_filter.clone()),
            &FindOptions::with_fields(pivot.column_names()),
        )?;

        let mut links: HashMap<String, Vec<PivotLink>> = HashMap::new();
        for pivot_row in &pivot_rows {
            let (Some(parent_key), Some(related_key)) = (
                composite_key(pivot_row, &relation.pivot_keys.foreign),
                composite_key(pivot_row, &relation.pivot_keys.related),
            ) else {
                continue;
            };
            let payload = relation
                .pivot_fields
                .iter()
                .filter_map(|field| {
                    pivot_row
                        .get(&field.name)
                        .map(|value| (format!("{PIVOT_FIELD_PREFIX}{}", field.name), value.clone()))
                })
                .collect();
            links.entry(parent_key).or_default().push(PivotLink {
                related_key,
                payload,
            });
        }

        let related_tuples = collect_key_tuples(&pivot_rows, &relation.pivot_keys.related);
        let Some(key_filter) = build_composite_filter(&relation.schema_key, &related_tuples) else {
            apply_default(rows, name, relation);
            debug!(
                "event=relation_load module=relation status=ok entity={} relation={} kind=many_to_many pivot_rows=0 duration_ms={}",
                entity.name,
                name,
                started_at.elapsed().as_millis()
            );
            return Ok(());
        };

        let plan = plan_related_fields(relation, node, related);
        let filter = key_filter
            .and(relation.filter.clone())
            .and(related.live_filter());
        let mut items = self.store.find(&related.table, &filter, &plan.options())?;
        let index = build_relation_map_single(&items, &relation.schema_key);
        self.materialize(related, &mut items, &node.children, &plan.temporary)?;

        for row in rows.iter_mut() {
            let matched: Vec<Value> = composite_key(row, &relation.foreign_key)
                .and_then(|key| links.get(&key))
                .map(|parent_links| {
                    parent_links
                        .iter()
                        .filter_map(|link| {
                            index.get(&link.related_key).map(|&position| {
                                let mut item = items[position].clone();
                                item.extend(link.payload.clone());
                                Value::Map(item)
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            let value = if matched.is_empty() && relation.nullable {
                Value::Null
            } else {
                Value::List(matched)
            };
            row.insert(name.to_string(), value);
        }

        debug!(
            "event=relation_load module=relation status=ok entity={} relation={} kind=many_to_many pivot_rows={} related={} duration_ms={}",
            entity.name,
            name,
            pivot_rows.len(),
            items.len(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}
