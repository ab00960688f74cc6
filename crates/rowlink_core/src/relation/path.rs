//! Relation path resolution.
//!
//! Turns `with_relation` strings such as `"children.grandchildren.value"`
//! into a nested tree: leading segments that name relations become nodes,
//! the first non-relation segment (and anything after it) becomes a field
//! path on the deepest node.
//!
//! # Invariants
//! - Paths whose first segment is not a declared relation are dropped.
//! - Paths with empty segments or deeper than the configured cap are dropped.
//! - A trailing field path that is not a plain column name is dropped; the
//!   relation chain in front of it still loads with its default fields.
//! - Repeated paths union into one node, so each relation is fetched once.

use crate::schema::{is_valid_identifier, EntitySchema, SchemaRegistry};
use log::debug;
use std::collections::BTreeMap;

/// Requested relation subtree keyed by relation name.
pub type RelationTree = BTreeMap<String, RelationNode>;

/// One requested relation within a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationNode {
    /// Explicit field paths requested past the relation name.
    pub fields: Vec<String>,
    pub children: RelationTree,
    /// Some path ended exactly at this relation.
    pub load_default: bool,
}

/// Resolves relation request paths for `entity`.
pub fn resolve_relation_paths<P: AsRef<str>>(
    registry: &SchemaRegistry,
    entity: &EntitySchema,
    paths: &[P],
    max_depth: usize,
) -> RelationTree {
    let mut tree = RelationTree::new();
    for path in paths {
        let path = path.as_ref();
        let Some((relations, field)) = split_path(registry, entity, path) else {
            debug!(
                "event=relation_path_dropped module=relation status=skip entity={} path={} reason=unknown_relation",
                entity.name, path
            );
            continue;
        };
        if relations.len() > max_depth {
            debug!(
                "event=relation_path_dropped module=relation status=skip entity={} path={} reason=depth_exceeded max_depth={}",
                entity.name, path, max_depth
            );
            continue;
        }

        let mut names = relations.into_iter();
        let Some(first) = names.next() else {
            continue;
        };
        let mut node = tree.entry(first.to_string()).or_default();
        for name in names {
            node = node.children.entry(name.to_string()).or_default();
        }

        match field {
            Some(field) if !is_valid_identifier(&field) => {
                debug!(
                    "event=relation_path_dropped module=relation status=skip entity={} path={} reason=invalid_field field={}",
                    entity.name, path, field
                );
            }
            Some(field) => {
                if !node.fields.contains(&field) {
                    node.fields.push(field);
                }
            }
            None => node.load_default = true,
        }
    }
    tree
}

/// Splits a path into its relation chain and optional trailing field path.
fn split_path<'p>(
    registry: &SchemaRegistry,
    entity: &EntitySchema,
    path: &'p str,
) -> Option<(Vec<&'p str>, Option<String>)> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return None;
    }

    let first = segments[0];
    let relation = entity.relations.get(first)?;
    let mut relations = vec![first];
    let mut current = registry.get(&relation.schema);

    for (index, segment) in segments.iter().enumerate().skip(1) {
        match current.and_then(|schema| schema.relations.get(*segment)) {
            Some(relation) => {
                relations.push(*segment);
                current = registry.get(&relation.schema);
            }
            None => return Some((relations, Some(segments[index..].join(".")))),
        }
    }
    Some((relations, None))
}
