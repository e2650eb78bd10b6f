//! Record table synchronization
//!
//! Brings the physical table of a base/auth collection in line with its
//! logical schema. Creating a table is a single statement plus indexes; an
//! update diffs the old and new schema by field id and runs every statement
//! inside one transaction.
//!
//! The table creation and cardinality statements are also available as plain
//! builders ([`create_table_statements`], [`cardinality_statements`]) for
//! rendering in either [`Dialect`].

use crate::dao::Dao;
use crate::dialect::Dialect;
use crate::error::{SqliteError, SqliteResult};
use crate::search::Params;
use cairn_core::schema::{
    FIELD_NAME_CREATED, FIELD_NAME_EMAIL, FIELD_NAME_EMAIL_VISIBILITY, FIELD_NAME_ID,
    FIELD_NAME_LAST_RESET_SENT_AT, FIELD_NAME_LAST_VERIFICATION_SENT_AT, FIELD_NAME_PASSWORD_HASH,
    FIELD_NAME_TOKEN_KEY, FIELD_NAME_UPDATED, FIELD_NAME_USERNAME, FIELD_NAME_VERIFIED,
};
use cairn_core::utils::{random_string, subtract_slice};
use cairn_core::{Collection, ParsedIndex};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Column definitions of the extra auth columns
const AUTH_COLUMNS: [(&str, &str); 8] = [
    (FIELD_NAME_USERNAME, "TEXT NOT NULL"),
    (FIELD_NAME_EMAIL, "TEXT DEFAULT '' NOT NULL"),
    (FIELD_NAME_EMAIL_VISIBILITY, "BOOLEAN DEFAULT FALSE NOT NULL"),
    (FIELD_NAME_VERIFIED, "BOOLEAN DEFAULT FALSE NOT NULL"),
    (FIELD_NAME_TOKEN_KEY, "TEXT NOT NULL"),
    (FIELD_NAME_PASSWORD_HASH, "TEXT NOT NULL"),
    (FIELD_NAME_LAST_RESET_SENT_AT, "TEXT DEFAULT '' NOT NULL"),
    (FIELD_NAME_LAST_VERIFICATION_SENT_AT, "TEXT DEFAULT '' NOT NULL"),
];

fn column_definitions(dialect: Dialect, collection: &Collection) -> Vec<(String, String)> {
    let mut columns: Vec<(String, String)> = vec![
        (FIELD_NAME_ID.to_string(), dialect.id_column_definition().to_string()),
        (FIELD_NAME_CREATED.to_string(), dialect.datetime_column_definition().to_string()),
        (FIELD_NAME_UPDATED.to_string(), dialect.datetime_column_definition().to_string()),
    ];
    if collection.is_auth() {
        columns.extend(
            AUTH_COLUMNS
                .iter()
                .map(|(name, def)| (name.to_string(), def.to_string())),
        );
    }
    for field in collection.schema.fields() {
        columns.push((field.name.clone(), dialect.column_definition(field).to_string()));
    }
    columns
}

/// `CREATE TABLE` plus the system and custom indexes of a records table
pub fn create_table_statements(dialect: Dialect, collection: &Collection) -> SqliteResult<Vec<String>> {
    let definitions: Vec<String> = column_definitions(dialect, collection)
        .iter()
        .map(|(name, def)| format!("[[{}]] {}", name, def))
        .collect();
    let table = &collection.name;
    let id = &collection.base.id;

    let mut statements = vec![
        format!("CREATE TABLE {{{{{}}}}} ({})", table, definitions.join(", ")),
        format!("CREATE INDEX _{}_created_idx ON {{{{{}}}}} ([[created]])", id, table),
    ];
    if collection.is_auth() {
        statements.push(format!(
            "CREATE UNIQUE INDEX _{}_username_idx ON {{{{{}}}}} ([[username]])",
            id, table
        ));
        statements.push(format!(
            "CREATE UNIQUE INDEX _{}_email_idx ON {{{{{}}}}} ([[email]]) WHERE [[email]] != ''",
            id, table
        ));
        statements.push(format!(
            "CREATE UNIQUE INDEX _{}_tokenKey_idx ON {{{{{}}}}} ([[tokenKey]])",
            id, table
        ));
    }
    statements.extend(custom_index_statements(dialect, collection)?);
    Ok(statements)
}

/// Custom indexes of `collection`, retargeted at its current table name
fn custom_index_statements(dialect: Dialect, collection: &Collection) -> SqliteResult<Vec<String>> {
    collection
        .indexes
        .iter()
        .map(|statement| {
            let mut index = ParsedIndex::parse(statement);
            if !index.is_valid() {
                return Err(SqliteError::Schema(format!(
                    "invalid index definition {:?}",
                    statement
                )));
            }
            index.table_name = collection.name.clone();
            Ok(index.build_quoted(|ident| dialect.quote(ident)))
        })
        .collect()
}

fn drop_index_statements(dialect: Dialect, collection: &Collection) -> Vec<String> {
    collection
        .indexes
        .iter()
        .map(|statement| ParsedIndex::parse(statement))
        .filter(ParsedIndex::is_valid)
        .map(|index| dialect.drop_index(&index.index_name))
        .collect()
}

/// Rewrites of stored values for fields that switched between single and
/// multiple values.
///
/// Single to multiple wraps the value in an array; multiple to single keeps the last item.
pub fn cardinality_statements(dialect: Dialect, collection: &Collection, old: &Collection) -> Vec<String> {
    let mut statements = Vec::new();
    for field in collection.schema.fields() {
        if !field.field_type().is_arrayable() {
            continue;
        }
        let was_multiple = old
            .schema
            .get_field_by_id(&field.id)
            .is_some_and(|f| f.is_multiple());
        if was_multiple == field.is_multiple() {
            continue;
        }

        let column = format!("[[{}]]", field.name);
        let value = if field.is_multiple() {
            dialect.wrap_json_array(&column)
        } else {
            dialect.last_json_array_item(&column)
        };
        statements.push(format!(
            "UPDATE {{{{{}}}}} SET {} = {}",
            collection.name, column, value
        ));
    }
    statements
}

impl<'c> Dao<'c> {
    /// Whether a table (or view) with this name exists, ignoring case
    pub fn has_table(&self, name: &str) -> SqliteResult<bool> {
        let params = Params::from([("name".to_string(), Value::String(name.to_string()))]);
        let rows = self.query_rows_with_timeout(
            self.dialect().table_exists_sql(),
            &params,
            self.config().model_query_timeout(),
        )?;
        Ok(!rows.is_empty())
    }

    /// Column names of a table in declaration order
    pub fn table_columns(&self, name: &str) -> SqliteResult<Vec<String>> {
        let params = Params::from([("name".to_string(), Value::String(name.to_string()))]);
        let rows = self.query_rows_with_timeout(
            self.dialect().table_columns_sql(),
            &params,
            self.config().model_query_timeout(),
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    /// Create or migrate the records table of `collection`.
    ///
    /// `old` is the previously stored definition; `None` (or a missing table)
    /// creates the table from scratch.
    pub fn sync_record_table_schema(
        &self,
        collection: &Collection,
        old: Option<&Collection>,
    ) -> SqliteResult<()> {
        if collection.is_view() {
            return Err(SqliteError::InvalidOperation(format!(
                "view collection {:?} has no records table",
                collection.name
            )));
        }

        match old {
            Some(old) if self.has_table(&old.name)? => self.update_record_table(collection, old),
            _ => self.create_record_table(collection),
        }
    }

    fn create_record_table(&self, collection: &Collection) -> SqliteResult<()> {
        let statements = create_table_statements(self.dialect(), collection)?;

        self.run_in_transaction(|tx| {
            for statement in &statements {
                tx.execute_ddl(statement)?;
            }
            Ok(())
        })?;

        info!(
            collection = %collection.name,
            columns = column_definitions(self.dialect(), collection).len(),
            "Records table created"
        );
        Ok(())
    }

    fn update_record_table(&self, collection: &Collection, old: &Collection) -> SqliteResult<()> {
        let table = collection.name.as_str();

        self.run_in_transaction(|tx| {
            for statement in drop_index_statements(tx.dialect(), old) {
                tx.execute_ddl(&statement)?;
            }

            if !old.name.eq_ignore_ascii_case(table) {
                tx.execute_ddl(&format!(
                    "ALTER TABLE {{{{{}}}}} RENAME TO {{{{{}}}}}",
                    old.name, table
                ))?;
            }

            let mut deleted: Vec<String> = Vec::new();
            for old_field in old.schema.fields() {
                if collection.schema.get_field_by_id(&old_field.id).is_none() {
                    tx.execute_ddl(&format!(
                        "ALTER TABLE {{{{{}}}}} DROP COLUMN [[{}]]",
                        table, old_field.name
                    ))?;
                    deleted.push(old_field.name.clone());
                }
            }

            // every added or renamed column goes through a temporary name so
            // that swapped names never collide
            let mut renamed: HashMap<String, String> = HashMap::new();
            let mut staged: Vec<(String, String)> = Vec::new();
            for field in collection.schema.fields() {
                let temp = format!("{}{}", field.name, random_string(5));
                match old.schema.get_field_by_id(&field.id) {
                    None => {
                        tx.execute_ddl(&format!(
                            "ALTER TABLE {{{{{}}}}} ADD COLUMN [[{}]] {}",
                            table,
                            temp,
                            tx.dialect().column_definition(field)
                        ))?;
                    }
                    Some(old_field) if old_field.name != field.name => {
                        tx.execute_ddl(&format!(
                            "ALTER TABLE {{{{{}}}}} RENAME COLUMN [[{}]] TO [[{}]]",
                            table, old_field.name, temp
                        ))?;
                        renamed.insert(old_field.name.clone(), field.name.clone());
                    }
                    Some(_) => continue,
                }
                staged.push((temp, field.name.clone()));
            }

            for (temp, name) in &staged {
                tx.execute_ddl(&format!(
                    "ALTER TABLE {{{{{}}}}} RENAME COLUMN [[{}]] TO [[{}]]",
                    table, temp, name
                ))?;
            }

            for statement in cardinality_statements(tx.dialect(), collection, old) {
                tx.execute_ddl(&statement)?;
            }
            tx.sync_relation_display_fields(collection, &renamed, &deleted)?;
            for statement in custom_index_statements(tx.dialect(), collection)? {
                tx.execute_ddl(&statement)?;
            }
            Ok(())
        })?;

        info!(collection = %table, "Records table updated");
        Ok(())
    }

    /// Carry renamed/deleted field names into the display fields of other
    /// collections' relations. Only the collection rows are saved.
    fn sync_relation_display_fields(
        &self,
        collection: &Collection,
        renamed: &HashMap<String, String>,
        deleted: &[String],
    ) -> SqliteResult<()> {
        if renamed.is_empty() && deleted.is_empty() {
            return Ok(());
        }

        for (mut reference, fields) in
            self.find_collection_references(collection, &[&collection.base.id])?
        {
            let mut changed = false;
            for field in fields {
                let Some(options) = reference
                    .schema
                    .get_field_by_id_mut(&field.id)
                    .and_then(|f| f.options.as_relation_mut())
                else {
                    continue;
                };

                let mut display_fields = subtract_slice(&options.display_fields, deleted);
                for name in display_fields.iter_mut() {
                    if let Some(new_name) = renamed.get(name) {
                        *name = new_name.clone();
                    }
                }

                if display_fields != options.display_fields {
                    options.display_fields = display_fields;
                    changed = true;
                }
            }

            if changed {
                debug!(collection = %reference.name, "Updating relation display fields");
                self.save(&mut reference)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SqlitePool;
    use cairn_core::{FieldOptions, Schema, SchemaField, SelectOptions, TextOptions};

    fn dao() -> Dao<'static> {
        Dao::new(SqlitePool::memory().expect("Failed to create pool"))
    }

    fn text(name: &str) -> SchemaField {
        SchemaField::new(name, FieldOptions::Text(TextOptions::default()))
    }

    #[test]
    fn test_create_base_table_columns() {
        let dao = dao();
        let mut posts = Collection::new_base("posts").with_schema(Schema::new([text("title")]));
        dao.save_collection(&mut posts).expect("Failed to save");

        assert_eq!(
            dao.table_columns("posts").expect("Failed to describe"),
            vec!["id", "created", "updated", "title"]
        );
    }

    #[test]
    fn test_create_auth_table_columns() {
        let dao = dao();
        let mut users = Collection::new_auth("users").with_schema(Schema::new([text("name")]));
        dao.save_collection(&mut users).expect("Failed to save");

        let columns = dao.table_columns("users").expect("Failed to describe");
        assert_eq!(columns.len(), 3 + AUTH_COLUMNS.len() + 1);
        for (name, _) in AUTH_COLUMNS {
            assert!(columns.iter().any(|c| c == name), "missing {}", name);
        }
    }

    #[test]
    fn test_drop_and_add_columns() {
        let dao = dao();
        let mut posts = Collection::new_base("posts")
            .with_schema(Schema::new([text("title"), text("body")]));
        dao.save_collection(&mut posts).expect("Failed to save");

        let body_id = posts
            .schema
            .get_field_by_name("body")
            .map(|f| f.id.clone())
            .expect("body missing");
        posts.schema.remove_field(&body_id);
        posts.schema.add_field(text("summary"));
        dao.save_collection(&mut posts).expect("Failed to update");

        assert_eq!(
            dao.table_columns("posts").expect("Failed to describe"),
            vec!["id", "created", "updated", "title", "summary"]
        );
    }

    #[test]
    fn test_table_rename() {
        let dao = dao();
        let mut posts = Collection::new_base("posts").with_schema(Schema::new([text("title")]));
        dao.save_collection(&mut posts).expect("Failed to save");

        posts.name = "articles".to_string();
        dao.save_collection(&mut posts).expect("Failed to rename");

        assert!(dao.has_table("articles").expect("lookup failed"));
        assert!(!dao.has_table("posts").expect("lookup failed"));
    }

    #[test]
    fn test_single_to_multiple_wraps_values() {
        let dao = dao();
        let mut options = SelectOptions::default();
        options.values = vec!["a".to_string(), "b".to_string()];
        let mut posts = Collection::new_base("posts")
            .with_schema(Schema::new([SchemaField::new("tag", FieldOptions::Select(options))]));
        dao.save_collection(&mut posts).expect("Failed to save");
        dao.execute(
            "INSERT INTO {{posts}} ([[tag]]) VALUES ('a')",
            &Params::new(),
        )
        .expect("Failed to insert");

        if let Some(FieldOptions::Select(o)) = posts
            .schema
            .get_field_by_name_mut("tag")
            .map(|f| &mut f.options)
        {
            o.max_select = 2;
        }
        dao.save_collection(&mut posts).expect("Failed to update");

        let rows = dao
            .query_rows("SELECT [[tag]] FROM {{posts}}", &Params::new())
            .expect("Failed to query");
        assert_eq!(rows[0]["tag"], Value::String("[\"a\"]".to_string()));
    }

    fn select(name: &str, max_select: usize) -> SchemaField {
        let mut options = SelectOptions::default();
        options.values = vec!["a".to_string(), "b".to_string()];
        options.max_select = max_select;
        SchemaField::new(name, FieldOptions::Select(options))
    }

    #[test]
    fn test_statements_render_per_dialect() {
        let mut users = Collection::new_auth("users").with_schema(Schema::new([text("name")]));
        users.indexes = vec!["CREATE INDEX idx_name ON users (name)".to_string()];

        let create_sqlite: Vec<String> = create_table_statements(Dialect::Sqlite, &users)
            .expect("Failed to build")
            .iter()
            .map(|sql| Dialect::Sqlite.render(sql))
            .collect();
        let create_pg: Vec<String> = create_table_statements(Dialect::Postgres, &users)
            .expect("Failed to build")
            .iter()
            .map(|sql| Dialect::Postgres.render(sql))
            .collect();
        assert_eq!(create_sqlite.len(), 6);
        assert!(create_sqlite[0].starts_with("CREATE TABLE `users` (`id` TEXT PRIMARY KEY"));
        assert!(create_pg[0].starts_with("CREATE TABLE \"users\" (\"id\" TEXT PRIMARY KEY"));
        assert!(create_pg[0].contains("to_char(now()"));
        assert_eq!(create_sqlite[5], "CREATE INDEX `idx_name` ON `users` (`name`)");
        assert_eq!(create_pg[5], "CREATE INDEX \"idx_name\" ON \"users\" (\"name\")");
        assert!(create_pg.iter().all(|sql| !sql.contains('`')));

        let old = Collection::new_base("posts")
            .with_schema(Schema::new([select("tag", 1), select("labels", 2)]));
        let mut new = old.clone();
        for (name, max_select) in [("tag", 2), ("labels", 1)] {
            if let Some(FieldOptions::Select(o)) = new
                .schema
                .get_field_by_name_mut(name)
                .map(|f| &mut f.options)
            {
                o.max_select = max_select;
            }
        }

        let sqlite = cardinality_statements(Dialect::Sqlite, &new, &old);
        let pg = cardinality_statements(Dialect::Postgres, &new, &old);
        assert_eq!(sqlite.len(), 2);
        assert_eq!(pg.len(), 2);

        let sqlite: Vec<String> = sqlite.iter().map(|sql| Dialect::Sqlite.render(sql)).collect();
        assert!(sqlite[0].starts_with("UPDATE `posts` SET `tag` = "));
        assert!(sqlite[0].contains("json_array(`tag`)"));
        assert!(sqlite[1].contains("'$[#-1]'"));

        let pg: Vec<String> = pg.iter().map(|sql| Dialect::Postgres.render(sql)).collect();
        assert!(pg[0].starts_with("UPDATE \"posts\" SET \"tag\" = "));
        assert!(pg[0].contains("jsonb_build_array(\"tag\")"));
        assert!(pg[1].contains("(\"labels\")::jsonb->>-1"));
        for sql in &pg {
            assert!(sql.contains("jsonb_typeof"));
            assert!(!sql.contains("json_type("));
            assert!(!sql.contains("$[#-1]"));
        }
    }

    #[test]
    fn test_catalog_queries_render_per_dialect() {
        let params = Params::from([("name".to_string(), Value::String("posts".to_string()))]);
        for dialect in [Dialect::Sqlite, Dialect::Postgres] {
            let (exists, values) = dialect.render_with_params(dialect.table_exists_sql(), &params);
            let (columns, _) = dialect.render_with_params(dialect.table_columns_sql(), &params);
            match dialect {
                Dialect::Sqlite => {
                    assert!(exists.ends_with("LOWER(:name) LIMIT 1"));
                    assert_eq!(columns, "SELECT `name` FROM PRAGMA_TABLE_INFO(:name)");
                    assert!(values.is_empty());
                }
                Dialect::Postgres => {
                    assert!(exists.ends_with("LOWER($1) LIMIT 1"));
                    assert!(!exists.contains("sqlite_schema"));
                    assert!(columns.contains("table_name = $1"));
                    assert!(!columns.contains("PRAGMA"));
                    assert_eq!(values, vec![Value::String("posts".to_string())]);
                }
            }
        }
    }

    #[test]
    fn test_custom_indexes_follow_rename() {
        let dao = dao();
        let mut posts = Collection::new_base("posts").with_schema(Schema::new([text("title")]));
        posts.indexes = vec!["CREATE INDEX idx_title ON posts (title)".to_string()];
        dao.save_collection(&mut posts).expect("Failed to save");

        posts.name = "articles".to_string();
        dao.save_collection(&mut posts).expect("Failed to update");

        let rows = dao
            .query_rows(
                "SELECT [[tbl_name]] FROM sqlite_schema WHERE [[name]] = 'idx_title'",
                &Params::new(),
            )
            .expect("Failed to query");
        assert_eq!(rows[0]["tbl_name"], Value::String("articles".to_string()));
    }
}
