//! CLI smoke entry point.
//!
//! # Responsibility
//! - Exercise one relation-loading read end to end against in-memory SQLite.
//! - Print deterministic JSON for quick local sanity checks.
//!
//! Set `ROWLINK_LOG_DIR` to an absolute path to capture engine logs.

use log::info;
use rowlink_core::{
    default_log_level, init_logging, open_db_in_memory, row, EntitySchema, EntityService,
    FieldType, FindQuery, OrderBy, RelationDef, SchemaRegistry, SqliteStorage, Storage, Value,
};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var("ROWLINK_LOG_DIR") {
        init_logging(default_log_level(), log_dir)?;
    }

    let conn = open_db_in_memory()?;
    conn.execute_batch(
        "CREATE TABLE parents (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE children (
             id INTEGER PRIMARY KEY,
             parent_id INTEGER REFERENCES parents(id),
             value TEXT NOT NULL
         );",
    )?;

    let mut registry = SchemaRegistry::new();
    registry.register(
        EntitySchema::new("parents")
            .field("id", FieldType::Integer)
            .field("name", FieldType::Text)
            .relation(
                "children",
                RelationDef::many("children")
                    .foreign_key(["id"])
                    .schema_key(["parent_id"]),
            ),
    )?;
    registry.register(
        EntitySchema::new("children")
            .field("id", FieldType::Integer)
            .nullable_field("parent_id", FieldType::Integer)
            .field("value", FieldType::Text),
    )?;

    let service = EntityService::new(SqliteStorage::new(&conn), registry)?;
    let store = service.store();
    store.insert("parents", &row([("id", Value::from(1)), ("name", "a".into())]))?;
    store.insert("parents", &row([("id", Value::from(2)), ("name", "b".into())]))?;
    for (id, value) in [(1, "x"), (2, "y")] {
        store.insert(
            "children",
            &row([
                ("id", Value::from(id)),
                ("parent_id", Value::from(1)),
                ("value", value.into()),
            ]),
        )?;
    }

    let query = FindQuery::new()
        .order_by(OrderBy::asc("id"))
        .with_relation("children.value");
    let rows = service.find("parents", &query)?;
    info!("event=cli_smoke module=cli status=ok rows={}", rows.len());
    println!("rowlink_core version={}", rowlink_core::core_version());
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}
