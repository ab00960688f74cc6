//! Entity read/delete service.
//!
//! # Responsibility
//! - Resolve the schema registry once against the chosen storage backend.
//! - Serve reads with requested relations materialized in place.
//! - Run cascade-aware deletes atomically.
//!
//! # Invariants
//! - Reads exclude soft-deleted rows unless `include_deleted` is set.
//! - Join-only parent columns never leak into returned rows.
//! - A failed delete leaves storage unchanged.

use crate::config::EngineConfig;
use crate::filter::{Filter, FindOptions, OrderBy};
use crate::relation::pivot::PivotSchema;
use crate::relation::plan::plan_parent_fields;
use crate::relation::{
    resolve_relation_paths, EngineError, EngineResult, PivotManager, RelationContext,
};
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::storage::Storage;
use crate::value::Row;
use log::info;
use std::time::Instant;

/// Read request for one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// Columns to return. Empty returns every column.
    pub fields: Vec<String>,
    pub filter: Filter,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: u64,
    /// Relation paths such as `children` or `children.value`.
    pub relations: Vec<String>,
    pub include_deleted: bool,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
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

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_relation(mut self, path: impl Into<String>) -> Self {
        self.relations.push(path.into());
        self
    }

    pub fn include_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self
    }
}

/// One page of rows plus totals for the unpaged query.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Row>,
    pub total: u64,
    /// 1-based page number.
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

/// Service facade over a storage backend and a resolved schema registry.
pub struct EntityService<S: Storage> {
    store: S,
    registry: SchemaRegistry,
    config: EngineConfig,
    pivots: PivotManager,
}

impl<S: Storage> EntityService<S> {
    /// Creates a service with default configuration.
    pub fn new(store: S, registry: SchemaRegistry) -> EngineResult<Self> {
        Self::with_config(store, registry, EngineConfig::default())
    }

    /// Creates a service, resolving and validating every relation descriptor.
    pub fn with_config(
        store: S,
        mut registry: SchemaRegistry,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        registry.resolve(store.migrator().is_some())?;
        info!(
            "event=service_init module=service status=ok entities={} max_relation_depth={} max_cascade_depth={}",
            registry.len(),
            config.max_relation_depth,
            config.max_cascade_depth
        );
        Ok(Self {
            store,
            registry,
            config,
            pivots: PivotManager::new(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reads rows of `entity` with requested relations attached.
    pub fn find(&self, entity: &str, query: &FindQuery) -> EngineResult<Vec<Row>> {
        let schema = self.schema(entity)?;
        self.find_rows(schema, query, query.limit, query.offset)
    }

    /// Reads one 1-based page of `entity`.
    pub fn find_page(
        &self,
        entity: &str,
        query: &FindQuery,
        page: u64,
        per_page: u64,
    ) -> EngineResult<Page> {
        if page == 0 || per_page == 0 {
            return Err(EngineError::InvalidPagination { page, per_page });
        }
        let schema = self.schema(entity)?;
        let total = self.store.count(&schema.table, &base_filter(schema, query))?;
        let offset = (page - 1).saturating_mul(per_page);
        let items = self.find_rows(schema, query, Some(per_page), offset)?;
        Ok(Page {
            items,
            total,
            page,
            per_page,
            total_pages: total.div_ceil(per_page),
        })
    }

    /// Attaches relations to rows that were fetched elsewhere.
    ///
    /// Rows must already carry the foreign-key columns of the requested
    /// relations; rows missing them receive the relation default.
    pub fn load_relations<P: AsRef<str>>(
        &self,
        entity: &str,
        rows: &mut [Row],
        paths: &[P],
    ) -> EngineResult<()> {
        let schema = self.schema(entity)?;
        let tree = resolve_relation_paths(
            &self.registry,
            schema,
            paths,
            self.config.max_relation_depth,
        );
        self.context().materialize(schema, rows, &tree, &[])
    }

    /// Deletes live rows of `entity` matching `filter`, applying cascade policies.
    pub fn delete(&self, entity: &str, filter: &Filter) -> EngineResult<usize> {
        let schema = self.schema(entity)?;
        let started_at = Instant::now();
        let context = self.context();
        let deleted = self
            .store
            .atomically(|| context.delete_cascading(schema, filter, 0))?;
        info!(
            "event=service_delete module=service status=ok entity={} deleted={} duration_ms={}",
            entity,
            deleted,
            started_at.elapsed().as_millis()
        );
        Ok(deleted)
    }

    /// Creates or extends every many-to-many pivot table up front.
    ///
    /// Returns the synced pivot table names.
    pub fn sync_pivot_schemas(&self) -> EngineResult<Vec<String>> {
        let mut tables = Vec::new();
        for entity in self.registry.entities() {
            for relation in entity.relations.values() {
                if !relation.is_many_to_many() {
                    continue;
                }
                let related = self.registry.entity(&relation.schema)?;
                let schema =
                    PivotSchema::derive(entity, related, relation, self.config.default_key_type);
                if !tables.contains(&schema.table) {
                    self.pivots.sync(&self.store, &schema)?;
                    tables.push(schema.table);
                }
            }
        }
        Ok(tables)
    }

    /// Pivot table backing the many-to-many `relation` of `entity`.
    pub fn pivot_table_name(&self, entity: &str, relation: &str) -> EngineResult<String> {
        let schema = self.schema(entity)?;
        let definition = schema
            .relations
            .get(relation)
            .filter(|definition| definition.is_many_to_many())
            .ok_or_else(|| EngineError::UnknownRelation {
                entity: entity.to_string(),
                relation: relation.to_string(),
            })?;
        let related = self.registry.entity(&definition.schema)?;
        Ok(crate::relation::pivot::pivot_table_name(
            schema, related, definition,
        ))
    }

    fn schema(&self, entity: &str) -> EngineResult<&EntitySchema> {
        self.registry
            .get(entity)
            .ok_or_else(|| EngineError::UnknownEntity(entity.to_string()))
    }

    fn context(&self) -> RelationContext<'_, S> {
        RelationContext {
            store: &self.store,
            registry: &self.registry,
            config: &self.config,
            pivots: &self.pivots,
        }
    }

    fn find_rows(
        &self,
        schema: &EntitySchema,
        query: &FindQuery,
        limit: Option<u64>,
        offset: u64,
    ) -> EngineResult<Vec<Row>> {
        let tree = resolve_relation_paths(
            &self.registry,
            schema,
            &query.relations,
            self.config.max_relation_depth,
        );
        let plan = plan_parent_fields(&query.fields, schema, &tree);
        let options = FindOptions {
            fields: plan.fields.clone(),
            order_by: query.order_by.clone(),
            limit,
            offset,
        };
        let mut rows = self
            .store
            .find(&schema.table, &base_filter(schema, query), &options)?;
        self.context()
            .materialize(schema, &mut rows, &tree, &plan.temporary)?;
        Ok(rows)
    }
}

fn base_filter(schema: &EntitySchema, query: &FindQuery) -> Filter {
    if query.include_deleted {
        query.filter.clone()
    } else {
        query.filter.clone().and(schema.live_filter())
    }
}
