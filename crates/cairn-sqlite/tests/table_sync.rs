//! Table synchronization against a real database

use cairn_core::{Collection, FieldOptions, NumberOptions, Schema, SchemaField, TextOptions};
use cairn_sqlite::search::Params;
use cairn_sqlite::{Dao, SqlitePool};
use serde_json::{json, Value};
use test_case::test_case;

fn dao() -> Dao<'static> {
    Dao::new(SqlitePool::memory().expect("Failed to create pool"))
}

fn text(name: &str) -> SchemaField {
    SchemaField::new(name, FieldOptions::Text(TextOptions::default()))
}

fn rows(dao: &Dao<'_>, sql: &str) -> Vec<serde_json::Map<String, Value>> {
    dao.query_rows(sql, &Params::new()).expect("Failed to query")
}

// ============================================================================
// Create
// ============================================================================

#[test_case(false ; "base collection")]
#[test_case(true ; "auth collection")]
fn test_created_columns_match_schema(auth: bool) {
    let dao = dao();
    let schema = Schema::new([
        text("title"),
        SchemaField::new("views", FieldOptions::Number(NumberOptions::default())),
    ]);
    let mut collection = if auth {
        Collection::new_auth("people")
    } else {
        Collection::new_base("people")
    }
    .with_schema(schema);
    dao.save_collection(&mut collection).expect("Failed to save");

    let mut expected = vec!["id", "created", "updated"];
    if auth {
        expected.extend([
            "username",
            "email",
            "emailVisibility",
            "verified",
            "tokenKey",
            "passwordHash",
            "lastResetSentAt",
            "lastVerificationSentAt",
        ]);
    }
    expected.extend(["title", "views"]);

    let mut columns = dao.table_columns("people").expect("Failed to describe");
    columns.sort();
    expected.sort();
    assert_eq!(columns, expected);
}

#[test]
fn test_auth_indexes_are_created() {
    let dao = dao();
    let mut users = Collection::new_auth("users");
    dao.save_collection(&mut users).expect("Failed to save");

    let indexes = rows(
        &dao,
        "SELECT [[name]] FROM sqlite_schema WHERE [[type]] = 'index' AND [[tbl_name]] = 'users' ORDER BY [[name]]",
    );
    let names: Vec<&str> = indexes.iter().filter_map(|r| r["name"].as_str()).collect();
    for suffix in ["_created_idx", "_email_idx", "_tokenKey_idx", "_username_idx"] {
        assert!(
            names.iter().any(|n| n.ends_with(suffix)),
            "missing index {} in {:?}",
            suffix,
            names
        );
    }
}

// ============================================================================
// Update
// ============================================================================

#[test]
fn test_rename_preserves_data() {
    let dao = dao();
    let mut posts = Collection::new_base("posts").with_schema(Schema::new([text("title")]));
    dao.save_collection(&mut posts).expect("Failed to save");
    dao.execute("INSERT INTO {{posts}} ([[title]]) VALUES ('hello')", &Params::new())
        .expect("Failed to insert");

    if let Some(field) = posts.schema.get_field_by_name_mut("title") {
        field.name = "headline".to_string();
    }
    dao.save_collection(&mut posts).expect("Failed to rename");

    let columns = dao.table_columns("posts").expect("Failed to describe");
    assert!(columns.contains(&"headline".to_string()));
    assert!(!columns.contains(&"title".to_string()));
    assert_eq!(rows(&dao, "SELECT [[headline]] FROM {{posts}}")[0]["headline"], json!("hello"));
}

#[test]
fn test_swapped_names_swap_values() {
    let dao = dao();
    let mut posts = Collection::new_base("posts")
        .with_schema(Schema::new([text("name"), text("title")]));
    dao.save_collection(&mut posts).expect("Failed to save");
    dao.execute(
        "INSERT INTO {{posts}} ([[name]], [[title]]) VALUES ('A', 'B')",
        &Params::new(),
    )
    .expect("Failed to insert");

    for field in posts.schema.fields_mut() {
        field.name = if field.name == "name" { "title" } else { "name" }.to_string();
    }
    dao.save_collection(&mut posts).expect("Failed to swap");

    let row = &rows(&dao, "SELECT [[name]], [[title]] FROM {{posts}}")[0];
    assert_eq!(row["name"], json!("B"));
    assert_eq!(row["title"], json!("A"));

    let columns = dao.table_columns("posts").expect("Failed to describe");
    assert_eq!(columns.len(), 5);
}

#[test]
fn test_failed_update_leaves_table_untouched() {
    let dao = dao();
    let mut posts = Collection::new_base("posts").with_schema(Schema::new([text("title")]));
    dao.save_collection(&mut posts).expect("Failed to save");

    let mut broken = posts.clone();
    broken.schema.add_field(text("body"));
    broken.indexes = vec!["CREATE INDEX broken ON posts".to_string()];
    assert!(dao.save_collection(&mut broken).is_err());

    assert_eq!(
        dao.table_columns("posts").expect("Failed to describe"),
        vec!["id", "created", "updated", "title"]
    );
}

#[test]
fn test_display_fields_follow_renames() {
    let dao = dao();
    let mut users = Collection::new_base("users").with_schema(Schema::new([text("name")]));
    dao.save_collection(&mut users).expect("Failed to save users");

    let mut relation = cairn_core::RelationOptions::new(users.base.id.clone(), Some(1));
    relation.display_fields = vec!["name".to_string()];
    let mut posts = Collection::new_base("posts")
        .with_schema(Schema::new([SchemaField::new("author", FieldOptions::Relation(relation))]));
    dao.save_collection(&mut posts).expect("Failed to save posts");

    if let Some(field) = users.schema.get_field_by_name_mut("name") {
        field.name = "fullName".to_string();
    }
    dao.save_collection(&mut users).expect("Failed to rename");

    let posts = dao.find_collection_by_name_or_id("posts").expect("Lookup failed");
    let display = posts
        .schema
        .get_field_by_name("author")
        .and_then(|f| f.options.as_relation())
        .map(|o| o.display_fields.clone())
        .expect("author missing");
    assert_eq!(display, vec!["fullName".to_string()]);
}
