use rowlink_core::db::open_db_in_memory;
use rowlink_core::{
    row, CascadeType, EngineConfig, EngineError, EntitySchema, EntityService, FieldType, Filter,
    FindQuery, MemoryStorage, OrderBy, RelationDef, SchemaRegistry, SoftDelete, SqliteStorage,
    Storage, Value,
};
use rusqlite::Connection;

fn library_registry(books: CascadeType, reviews: CascadeType) -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            EntitySchema::new("authors")
                .field("id", FieldType::Integer)
                .field("name", FieldType::Text)
                .relation(
                    "books",
                    RelationDef::many("books")
                        .schema_key(["author_id"])
                        .cascade(books),
                )
                .relation(
                    "bio",
                    RelationDef::single("bios")
                        .schema_key(["author_id"])
                        .cascade_text("set null"),
                ),
        )
        .unwrap();
    registry
        .register(
            EntitySchema::new("books")
                .field("id", FieldType::Integer)
                .nullable_field("author_id", FieldType::Integer)
                .field("title", FieldType::Text)
                .soft_delete(SoftDelete::flag("deleted"))
                .relation(
                    "reviews",
                    RelationDef::many("reviews")
                        .schema_key(["book_id"])
                        .cascade(reviews),
                ),
        )
        .unwrap();
    registry.register(EntitySchema::new("reviews")).unwrap();
    registry.register(EntitySchema::new("bios")).unwrap();
    registry
}

fn library_db() -> Connection {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE books (
             id INTEGER PRIMARY KEY,
             author_id INTEGER,
             title TEXT NOT NULL,
             deleted INTEGER NOT NULL DEFAULT 0
         );
         CREATE TABLE reviews (id INTEGER PRIMARY KEY, book_id INTEGER, body TEXT);
         CREATE TABLE bios (id INTEGER PRIMARY KEY, author_id INTEGER, text TEXT);
         INSERT INTO authors (id, name) VALUES (1, 'ann'), (2, 'bob');
         INSERT INTO books (id, author_id, title) VALUES (1, 1, 'one'), (2, 1, 'two'), (3, 2, 'three');
         INSERT INTO reviews (id, book_id, body) VALUES (1, 1, 'good'), (2, 3, 'fine');
         INSERT INTO bios (id, author_id, text) VALUES (1, 1, 'about ann');",
    )
    .unwrap();
    conn
}

fn ids(conn: &Connection, sql: &str) -> Vec<i64> {
    let mut stmt = conn.prepare(sql).unwrap();
    let rows = stmt.query_map([], |row| row.get(0)).unwrap();
    rows.collect::<Result<Vec<_>, _>>().unwrap()
}

#[test]
fn restrict_blocks_delete_without_partial_effect() {
    let conn = library_db();
    let service = EntityService::new(
        SqliteStorage::new(&conn),
        library_registry(CascadeType::Restrict, CascadeType::Cascade),
    )
    .unwrap();

    let err = service
        .delete("authors", &Filter::is_in("id", [1, 2]))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::CascadeRestrict { ref entity, ref relation, ref related }
            if entity == "authors" && relation == "books" && related == "books"
    ));
    assert_eq!(ids(&conn, "SELECT id FROM authors ORDER BY id;"), vec![1, 2]);
    assert_eq!(ids(&conn, "SELECT id FROM bios;"), vec![1]);
}

#[test]
fn restrict_ignores_soft_deleted_rows() {
    let conn = library_db();
    conn.execute("UPDATE books SET deleted = 1 WHERE author_id = 2;", [])
        .unwrap();
    let service = EntityService::new(
        SqliteStorage::new(&conn),
        library_registry(CascadeType::Restrict, CascadeType::Cascade),
    )
    .unwrap();

    assert_eq!(service.delete("authors", &Filter::eq("id", 2)).unwrap(), 1);
    assert_eq!(ids(&conn, "SELECT id FROM authors;"), vec![1]);
}

#[test]
fn set_null_clears_child_keys_and_skips_single_relations() {
    let conn = library_db();
    let service = EntityService::new(
        SqliteStorage::new(&conn),
        library_registry(CascadeType::SetNull, CascadeType::Cascade),
    )
    .unwrap();

    assert_eq!(service.delete("authors", &Filter::eq("id", 1)).unwrap(), 1);

    assert_eq!(
        ids(&conn, "SELECT id FROM books WHERE author_id IS NULL ORDER BY id;"),
        vec![1, 2]
    );
    assert_eq!(ids(&conn, "SELECT id FROM books WHERE deleted = 0;"), vec![1, 2, 3]);
    assert_eq!(ids(&conn, "SELECT author_id FROM bios;"), vec![1]);
    assert_eq!(ids(&conn, "SELECT id FROM authors;"), vec![2]);
}

#[test]
fn nested_cascade_soft_deletes_and_hard_deletes_per_entity() {
    let conn = library_db();
    let service = EntityService::new(
        SqliteStorage::new(&conn),
        library_registry(CascadeType::Cascade, CascadeType::Cascade),
    )
    .unwrap();

    assert_eq!(service.delete("authors", &Filter::eq("id", 1)).unwrap(), 1);

    assert_eq!(ids(&conn, "SELECT id FROM authors;"), vec![2]);
    assert_eq!(
        ids(&conn, "SELECT id FROM books WHERE deleted = 1 ORDER BY id;"),
        vec![1, 2]
    );
    assert_eq!(ids(&conn, "SELECT id FROM reviews;"), vec![2]);

    let live = service
        .find("books", &FindQuery::new().order_by(OrderBy::asc("id")))
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0]["id"], Value::Int(3));

    let all = service
        .find("books", &FindQuery::new().include_deleted(true))
        .unwrap();
    assert_eq!(all.len(), 3);
}

#[test]
fn restrict_deep_in_the_tree_rolls_back_outer_levels() {
    let conn = library_db();
    let service = EntityService::new(
        SqliteStorage::new(&conn),
        library_registry(CascadeType::Cascade, CascadeType::Restrict),
    )
    .unwrap();

    let err = service.delete("authors", &Filter::eq("id", 1)).unwrap_err();
    assert!(matches!(
        err,
        EngineError::CascadeRestrict { ref entity, .. } if entity == "books"
    ));
    assert_eq!(ids(&conn, "SELECT id FROM authors ORDER BY id;"), vec![1, 2]);
    assert_eq!(ids(&conn, "SELECT id FROM books WHERE deleted = 0;"), vec![1, 2, 3]);
    assert_eq!(ids(&conn, "SELECT author_id FROM bios;"), vec![1]);
}

#[test]
fn cascade_depth_is_capped_for_cyclic_data() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE categories (id INTEGER PRIMARY KEY, parent_id INTEGER);
         INSERT INTO categories (id, parent_id) VALUES (1, 3), (2, 1), (3, 2);",
    )
    .unwrap();
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            EntitySchema::new("categories").relation(
                "children",
                RelationDef::many("categories")
                    .schema_key(["parent_id"])
                    .cascade(CascadeType::Cascade),
            ),
        )
        .unwrap();
    let config = EngineConfig {
        max_cascade_depth: 4,
        ..EngineConfig::default()
    };
    let service = EntityService::with_config(SqliteStorage::new(&conn), registry, config).unwrap();

    let err = service.delete("categories", &Filter::eq("id", 1)).unwrap_err();
    assert!(matches!(
        err,
        EngineError::CascadeDepthExceeded { depth: 5, .. }
    ));
    assert_eq!(ids(&conn, "SELECT id FROM categories ORDER BY id;"), vec![1, 2, 3]);
}

#[test]
fn memory_backend_cascades_and_rolls_back() {
    let store = MemoryStorage::new();
    for table in ["authors", "books", "reviews", "bios"] {
        store.create_table(table);
    }
    store
        .insert("authors", &row([("id", Value::from(1)), ("name", "ann".into())]))
        .unwrap();
    for book in [1, 2] {
        store
            .insert(
                "books",
                &row([
                    ("id", Value::from(book)),
                    ("author_id", Value::from(1)),
                    ("deleted", Value::from(0)),
                ]),
            )
            .unwrap();
    }
    store
        .insert("reviews", &row([("id", Value::from(1)), ("book_id", Value::from(2))]))
        .unwrap();

    let blocked = EntityService::new(
        store,
        library_registry(CascadeType::Cascade, CascadeType::Restrict),
    )
    .unwrap();
    assert!(blocked.delete("authors", &Filter::eq("id", 1)).is_err());
    assert_eq!(blocked.store().count("authors", &Filter::All).unwrap(), 1);
    assert_eq!(
        blocked
            .store()
            .count("books", &Filter::eq("deleted", 1))
            .unwrap(),
        0
    );

    blocked.store().delete("reviews", &Filter::All).unwrap();
    assert_eq!(blocked.delete("authors", &Filter::eq("id", 1)).unwrap(), 1);
    assert_eq!(
        blocked
            .store()
            .count("books", &Filter::eq("deleted", 1))
            .unwrap(),
        2
    );
}
