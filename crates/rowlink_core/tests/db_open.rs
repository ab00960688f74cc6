use rowlink_core::db::open_db;
use rowlink_core::{
    row, EntitySchema, EntityService, FieldType, Filter, FindQuery, RelationDef, SchemaRegistry,
    SqliteStorage, Storage, Value,
};
use uuid::Uuid;

fn notes_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            EntitySchema::new("notebooks")
                .field("uuid", FieldType::Uuid)
                .primary_key(["uuid"])
                .relation(
                    "notes",
                    RelationDef::many("notes")
                        .schema_key(["notebook_uuid"])
                        .fields(["body"]),
                ),
        )
        .unwrap();
    registry
        .register(EntitySchema::new("notes").field("notebook_uuid", FieldType::Uuid))
        .unwrap();
    registry
}

#[test]
fn file_database_enables_foreign_keys_and_persists_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rowlink.sqlite3");
    let notebook = Uuid::new_v4();

    {
        let conn = open_db(&path).unwrap();
        let foreign_keys: i64 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);

        conn.execute_batch(
            "CREATE TABLE notebooks (uuid TEXT PRIMARY KEY);
             CREATE TABLE notes (
                 id INTEGER PRIMARY KEY,
                 notebook_uuid TEXT REFERENCES notebooks(uuid),
                 body TEXT NOT NULL
             );",
        )
        .unwrap();
        let store = SqliteStorage::new(&conn);
        store
            .insert("notebooks", &row([("uuid", Value::from(notebook))]))
            .unwrap();
        store
            .insert(
                "notes",
                &row([
                    ("notebook_uuid", Value::from(notebook)),
                    ("body", "persisted".into()),
                ]),
            )
            .unwrap();

        let orphan = store.insert(
            "notes",
            &row([
                ("notebook_uuid", Value::from(Uuid::new_v4())),
                ("body", "orphan".into()),
            ]),
        );
        assert!(orphan.is_err());
    }

    let conn = open_db(&path).unwrap();
    let service = EntityService::new(SqliteStorage::new(&conn), notes_registry()).unwrap();
    let rows = service
        .find(
            "notebooks",
            &FindQuery::new()
                .filter(Filter::eq("uuid", notebook))
                .with_relation("notes"),
        )
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0]["notes"],
        Value::List(vec![Value::Map(row([("body", "persisted")]))])
    );
}
