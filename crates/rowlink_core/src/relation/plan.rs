//! Field planning for related and parent fetches.
//!
//! A plan lists the columns to fetch plus the subset that exists only to
//! make joins possible. That subset is stripped once the level is attached.

use super::path::{RelationNode, RelationTree};
use crate::filter::FindOptions;
use crate::schema::{EntitySchema, RelationDef};

/// Projection for one fetch. Empty `fields` fetches every column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPlan {
    pub fields: Vec<String>,
    /// Join-only columns appended to `fields`.
    pub temporary: Vec<String>,
}

impl FieldPlan {
    pub fn options(&self) -> FindOptions {
        FindOptions::with_fields(self.fields.clone())
    }

    fn require(&mut self, column: &str) {
        if !self.fields.iter().any(|field| field == column) {
            self.fields.push(column.to_string());
            self.temporary.push(column.to_string());
        }
    }
}

/// Plans the related-entity projection for one requested relation.
///
/// Explicit field paths replace the relation's default fields unless a bare
/// path asked for the defaults too, in which case both are fetched.
pub fn plan_related_fields(
    relation: &RelationDef,
    node: &RelationNode,
    related: &EntitySchema,
) -> FieldPlan {
    let base = if node.fields.is_empty() {
        relation.fields.clone()
    } else if !node.load_default {
        node.fields.clone()
    } else if relation.fields.is_empty() {
        Vec::new()
    } else {
        let mut union = relation.fields.clone();
        for field in &node.fields {
            if !union.contains(field) {
                union.push(field.clone());
            }
        }
        union
    };

    let mut plan = FieldPlan {
        fields: dedupe(base),
        temporary: Vec::new(),
    };
    if plan.fields.is_empty() {
        return plan;
    }

    for column in &relation.schema_key {
        plan.require(column);
    }
    require_child_keys(&mut plan, related, &node.children);
    plan
}

/// Plans the top-level projection so every requested relation can join.
pub fn plan_parent_fields(
    requested: &[String],
    entity: &EntitySchema,
    tree: &RelationTree,
) -> FieldPlan {
    let mut plan = FieldPlan {
        fields: dedupe(requested.to_vec()),
        temporary: Vec::new(),
    };
    if plan.fields.is_empty() {
        return plan;
    }
    require_child_keys(&mut plan, entity, tree);
    plan
}

fn require_child_keys(plan: &mut FieldPlan, owner: &EntitySchema, children: &RelationTree) {
    for name in children.keys() {
        if let Some(child) = owner.relations.get(name) {
            for column in &child.foreign_key {
                plan.require(column);
            }
        }
    }
}

fn dedupe(fields: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(fields.len());
    for field in fields {
        if !unique.contains(&field) {
            unique.push(field);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::{plan_parent_fields, plan_related_fields};
    use crate::relation::path::{RelationNode, RelationTree};
    use crate::schema::{EntitySchema, RelationDef};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn children_relation() -> RelationDef {
        RelationDef::many("children")
            .foreign_key(["id"])
            .schema_key(["parent_id"])
            .fields(["id", "name"])
    }

    #[test]
    fn explicit_fields_replace_defaults_and_add_join_keys() {
        let node = RelationNode {
            fields: strings(&["value"]),
            ..RelationNode::default()
        };
        let plan = plan_related_fields(&children_relation(), &node, &EntitySchema::new("children"));
        assert_eq!(plan.fields, strings(&["value", "parent_id"]));
        assert_eq!(plan.temporary, strings(&["parent_id"]));
    }

    #[test]
    fn bare_and_explicit_paths_union_with_defaults() {
        let node = RelationNode {
            fields: strings(&["value", "name"]),
            load_default: true,
            ..RelationNode::default()
        };
        let plan = plan_related_fields(&children_relation(), &node, &EntitySchema::new("children"));
        assert_eq!(plan.fields, strings(&["id", "name", "value", "parent_id"]));
        assert_eq!(plan.temporary, strings(&["parent_id"]));
    }

    #[test]
    fn empty_projection_fetches_everything_without_temporaries() {
        let relation = RelationDef::many("children").schema_key(["parent_id"]);
        let node = RelationNode {
            load_default: true,
            ..RelationNode::default()
        };
        let plan = plan_related_fields(&relation, &node, &EntitySchema::new("children"));
        assert!(plan.fields.is_empty());
        assert!(plan.temporary.is_empty());
    }

    #[test]
    fn nested_children_require_their_foreign_keys() {
        let related = EntitySchema::new("children").relation(
            "toys",
            RelationDef::many("toys")
                .foreign_key(["id"])
                .schema_key(["child_id"]),
        );
        let mut children = RelationTree::new();
        children.insert("toys".to_string(), RelationNode::default());
        let node = RelationNode {
            fields: strings(&["value"]),
            children,
            load_default: false,
        };
        let plan = plan_related_fields(&children_relation(), &node, &related);
        assert_eq!(plan.fields, strings(&["value", "parent_id", "id"]));
        assert_eq!(plan.temporary, strings(&["parent_id", "id"]));
    }

    #[test]
    fn parent_plan_adds_relation_foreign_keys() {
        let parents = EntitySchema::new("parents").relation("children", children_relation());
        let mut tree = RelationTree::new();
        tree.insert("children".to_string(), RelationNode::default());

        let plan = plan_parent_fields(&strings(&["name", "name"]), &parents, &tree);
        assert_eq!(plan.fields, strings(&["name", "id"]));
        assert_eq!(plan.temporary, strings(&["id"]));

        let plan = plan_parent_fields(&[], &parents, &tree);
        assert!(plan.fields.is_empty());
    }
}
