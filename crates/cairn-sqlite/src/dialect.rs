//! SQL flavour specific rendering
//!
//! Generated SQL is written once with neutral placeholders and rendered per
//! dialect right before execution:
//!
//! - `{{table}}` - quoted table name
//! - `[[alias.column]]` - quoted (possibly qualified) column, `*` left bare
//! - `{:name}` - named bind parameter (`:name` for SQLite, `$N` for Postgres)
//!
//! The JSON helpers, catalog queries and column definitions below are the only
//! places where the two dialects differ in function names rather than quoting.
//! The Postgres flavour relies on the compatibility shims from
//! [`Dialect::compat_shims`].
//!
//! Statements are only executed through SQLite. Postgres output is produced by
//! [`Dialect::render_with_params`] for callers running it on their own driver.

use crate::search::Params;
use cairn_core::{FieldOptions, SchemaField};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

static COLUMN_PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\[\]]+)\]\]").unwrap());
static TABLE_PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^\{\}]+)\}\}").unwrap());
static PARAM_PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{:(\w+)\}").unwrap());

const POSTGRES_SHIMS: &str = r#"
CREATE OR REPLACE FUNCTION hex(data bytea) RETURNS text AS $$
    SELECT encode(data, 'hex')
$$ LANGUAGE sql IMMUTABLE;

CREATE OR REPLACE FUNCTION randomblob(length integer) RETURNS bytea AS $$
    SELECT decode(string_agg(lpad(to_hex(floor(random() * 256)::int), 2, '0'), ''), 'hex')
    FROM generate_series(1, length)
$$ LANGUAGE sql VOLATILE;

CREATE OR REPLACE FUNCTION json_valid(data text) RETURNS boolean AS $$
BEGIN
    PERFORM data::jsonb;
    RETURN TRUE;
EXCEPTION WHEN others THEN
    RETURN FALSE;
END
$$ LANGUAGE plpgsql IMMUTABLE;

CREATE OR REPLACE FUNCTION uuid_generate_v7() RETURNS uuid AS $$
    SELECT encode(
        set_bit(
            set_bit(
                overlay(uuid_send(gen_random_uuid())
                    PLACING substring(int8send(floor(extract(epoch FROM clock_timestamp()) * 1000)::bigint) FROM 3)
                    FROM 1 FOR 6),
                52, 1),
            53, 1),
        'hex')::uuid
$$ LANGUAGE sql VOLATILE;

CREATE COLLATION IF NOT EXISTS nocase (provider = icu, locale = 'und-u-ks-level2', deterministic = false);
"#;

/// Distinct `{:name}` parameters of `sql` in order of first appearance
pub fn bind_order(sql: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PARAM_PLACEHOLDER_RE.captures_iter(sql) {
        if !names.iter().any(|name| name == &caps[1]) {
            names.push(caps[1].to_string());
        }
    }
    names
}

/// Target SQL flavour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Quote a single identifier. `*` is passed through.
    pub fn quote(&self, ident: &str) -> String {
        if ident == "*" {
            return ident.to_string();
        }
        match self {
            Dialect::Sqlite => format!("`{}`", ident.replace('`', "``")),
            Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quote every segment of a dotted column reference
    pub fn quote_column(&self, path: &str) -> String {
        path.split('.')
            .map(|part| self.quote(part.trim()))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Replace the neutral placeholders with dialect syntax.
    ///
    /// Postgres parameters are numbered by first appearance (see [`bind_order`]),
    /// a repeated name reuses its number.
    pub fn render(&self, sql: &str) -> String {
        let sql = TABLE_PLACEHOLDER_RE.replace_all(sql, |caps: &Captures| self.quote(caps[1].trim()));
        let sql =
            COLUMN_PLACEHOLDER_RE.replace_all(&sql, |caps: &Captures| self.quote_column(&caps[1]));
        match self {
            Dialect::Sqlite => PARAM_PLACEHOLDER_RE
                .replace_all(&sql, |caps: &Captures| format!(":{}", &caps[1]))
                .into_owned(),
            Dialect::Postgres => {
                let order = bind_order(&sql);
                PARAM_PLACEHOLDER_RE
                    .replace_all(&sql, |caps: &Captures| {
                        let position = order.iter().position(|name| name == &caps[1]);
                        format!("${}", position.map_or(0, |i| i + 1))
                    })
                    .into_owned()
            }
        }
    }

    /// Render `sql` along with its positional values. Missing params bind NULL.
    /// SQLite keeps named parameters, so its value list is empty.
    pub fn render_with_params(&self, sql: &str, params: &Params) -> (String, Vec<Value>) {
        let values = match self {
            Dialect::Sqlite => Vec::new(),
            Dialect::Postgres => bind_order(sql)
                .iter()
                .map(|name| params.get(name).cloned().unwrap_or(Value::Null))
                .collect(),
        };
        (self.render(sql), values)
    }

    /// Query returning a row when a table or view named `{:name}` exists, ignoring case
    pub fn table_exists_sql(&self) -> &'static str {
        match self {
            Dialect::Sqlite => {
                "SELECT 1 FROM sqlite_schema WHERE type IN ('table', 'view') AND LOWER([[name]]) = LOWER({:name}) LIMIT 1"
            }
            Dialect::Postgres => {
                "SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND LOWER(table_name) = LOWER({:name}) LIMIT 1"
            }
        }
    }

    /// Query listing the `name` of every column of table `{:name}` in declaration order
    pub fn table_columns_sql(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "SELECT [[name]] FROM PRAGMA_TABLE_INFO({:name})",
            Dialect::Postgres => {
                "SELECT column_name AS name FROM information_schema.columns WHERE table_schema = current_schema() AND table_name = {:name} ORDER BY ordinal_position"
            }
        }
    }

    pub fn drop_index(&self, name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote(name))
    }

    /// Stored list value of a column that used to hold a single value.
    /// Empty becomes `[]`, arrays are kept, anything else is wrapped.
    pub fn wrap_json_array(&self, column: &str) -> String {
        match self {
            Dialect::Sqlite => format!(
                "(CASE WHEN COALESCE({c}, '') = '' THEN '[]' ELSE (CASE WHEN json_valid({c}) AND json_type({c}) = 'array' THEN {c} ELSE json_array({c}) END) END)",
                c = column
            ),
            Dialect::Postgres => format!(
                "(CASE WHEN COALESCE({c}, '') = '' THEN '[]' WHEN json_valid({c}) AND jsonb_typeof(({c})::jsonb) = 'array' THEN {c} ELSE jsonb_build_array({c})::text END)",
                c = column
            ),
        }
    }

    /// Stored single value of a column that used to hold a list: its last item
    pub fn last_json_array_item(&self, column: &str) -> String {
        match self {
            Dialect::Sqlite => format!(
                "(CASE WHEN COALESCE({c}, '[]') = '[]' THEN '' ELSE (CASE WHEN json_valid({c}) AND json_type({c}) = 'array' THEN COALESCE(json_extract({c}, '$[#-1]'), '') ELSE {c} END) END)",
                c = column
            ),
            Dialect::Postgres => format!(
                "(CASE WHEN COALESCE({c}, '[]') = '[]' THEN '' WHEN json_valid({c}) AND jsonb_typeof(({c})::jsonb) = 'array' THEN COALESCE(({c})::jsonb->>-1, '') ELSE {c} END)",
                c = column
            ),
        }
    }

    /// Table-valued expansion of a JSON array (scalars are treated as a one item array).
    /// The produced rows expose a `value` column.
    pub fn json_each(&self, expr: &str) -> String {
        match self {
            Dialect::Sqlite => format!(
                "json_each(CASE WHEN json_valid({e}) THEN {e} ELSE json_array({e}) END)",
                e = expr
            ),
            Dialect::Postgres => format!(
                "LATERAL jsonb_array_elements_text(CASE WHEN json_valid(({e})::text) THEN ({e})::text::jsonb ELSE jsonb_build_array({e}) END)",
                e = expr
            ),
        }
    }

    /// Number of items of a list column, treating empty/NULL as zero and scalars as one
    pub fn json_array_length(&self, expr: &str) -> String {
        match self {
            Dialect::Sqlite => format!(
                "json_array_length(CASE WHEN json_valid({e}) THEN {e} ELSE (CASE WHEN {e} = '' OR {e} IS NULL THEN json_array() ELSE json_array({e}) END) END)",
                e = expr
            ),
            Dialect::Postgres => format!(
                "jsonb_array_length(CASE WHEN json_valid(({e})::text) THEN ({e})::text::jsonb ELSE (CASE WHEN ({e})::text = '' OR {e} IS NULL THEN '[]'::jsonb ELSE jsonb_build_array({e}) END) END)",
                e = expr
            ),
        }
    }

    /// Extract `path` (e.g. `a.b[0]`) from a JSON column. Non-JSON values are
    /// wrapped so that an empty path returns the raw value.
    pub fn json_extract(&self, expr: &str, path: &str) -> String {
        let path = if !path.is_empty() && !path.starts_with('[') {
            format!(".{}", path)
        } else {
            path.to_string()
        };
        match self {
            Dialect::Sqlite => format!(
                "(CASE WHEN json_valid({e}) THEN JSON_EXTRACT({e}, '${p}') ELSE JSON_EXTRACT(json_object('pb', {e}), '$.pb{p}') END)",
                e = expr,
                p = path
            ),
            Dialect::Postgres => format!(
                "(CASE WHEN json_valid(({e})::text) THEN jsonb_path_query_first(({e})::text::jsonb, '${p}') ELSE jsonb_path_query_first(jsonb_build_object('pb', {e}), '$.pb{p}') END)",
                e = expr,
                p = path
            ),
        }
    }

    /// Case-insensitive collation clause
    pub fn nocase(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "COLLATE NOCASE",
            Dialect::Postgres => "COLLATE \"nocase\"",
        }
    }

    /// Functions and collations the generated SQL expects to exist
    pub fn compat_shims(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "",
            Dialect::Postgres => POSTGRES_SHIMS,
        }
    }

    /// `ON` clause of a join. Postgres requires one even for cross joins.
    pub fn join_condition(&self, on: Option<&str>) -> String {
        match (on, self) {
            (Some(on), _) => format!(" ON {}", on),
            (None, Dialect::Sqlite) => String::new(),
            (None, Dialect::Postgres) => " ON TRUE".to_string(),
        }
    }

    pub fn id_column_definition(&self) -> &'static str {
        "TEXT PRIMARY KEY DEFAULT ('r'||lower(hex(randomblob(7)))) NOT NULL"
    }

    pub fn datetime_column_definition(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "TEXT DEFAULT (strftime('%Y-%m-%d %H:%M:%fZ')) NOT NULL",
            Dialect::Postgres => {
                "TEXT DEFAULT (to_char(now() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS.MS\"Z\"')) NOT NULL"
            }
        }
    }

    /// Column type and constraints of a schema field
    pub fn column_definition(&self, field: &SchemaField) -> &'static str {
        match &field.options {
            FieldOptions::Number(_) => "NUMERIC DEFAULT 0 NOT NULL",
            FieldOptions::Bool(_) => "BOOLEAN DEFAULT FALSE NOT NULL",
            FieldOptions::Json(_) => match self {
                Dialect::Sqlite => "JSON DEFAULT NULL",
                Dialect::Postgres => "JSONB DEFAULT NULL",
            },
            _ if field.is_multiple() => "TEXT DEFAULT '[]' NOT NULL",
            _ => "TEXT DEFAULT '' NOT NULL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{RelationOptions, TextOptions};

    #[test]
    fn test_render_placeholders() {
        let sql = "SELECT [[p.*]], [[p.title]] FROM {{posts}} [[p]] WHERE [[p.id]] = {:id}";
        assert_eq!(
            Dialect::Sqlite.render(sql),
            "SELECT `p`.*, `p`.`title` FROM `posts` `p` WHERE `p`.`id` = :id"
        );
        assert_eq!(
            Dialect::Postgres.render(sql),
            "SELECT \"p\".*, \"p\".\"title\" FROM \"posts\" \"p\" WHERE \"p\".\"id\" = $1"
        );
    }

    #[test]
    fn test_postgres_numbers_params_by_first_appearance() {
        let sql = "SELECT 1 WHERE a = {:x} AND b = {:y} AND c = {:x}";
        assert_eq!(bind_order(sql), vec!["x", "y"]);
        assert_eq!(
            Dialect::Postgres.render(sql),
            "SELECT 1 WHERE a = $1 AND b = $2 AND c = $1"
        );

        let params = Params::from([("y".to_string(), Value::from(2))]);
        let (rendered, values) = Dialect::Postgres.render_with_params(sql, &params);
        assert!(rendered.ends_with("c = $1"));
        assert_eq!(values, vec![Value::Null, Value::from(2)]);

        let (rendered, values) = Dialect::Sqlite.render_with_params(sql, &params);
        assert_eq!(rendered, "SELECT 1 WHERE a = :x AND b = :y AND c = :x");
        assert!(values.is_empty());
    }

    #[test]
    fn test_catalog_queries() {
        assert!(Dialect::Sqlite.table_exists_sql().contains("sqlite_schema"));
        assert!(Dialect::Postgres.table_exists_sql().contains("information_schema.tables"));
        assert!(Dialect::Sqlite.table_columns_sql().contains("PRAGMA_TABLE_INFO"));
        assert!(Dialect::Postgres.table_columns_sql().contains("ordinal_position"));
        assert_eq!(Dialect::Sqlite.drop_index("idx"), "DROP INDEX IF EXISTS `idx`");
        assert_eq!(Dialect::Postgres.drop_index("idx"), "DROP INDEX IF EXISTS \"idx\"");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(Dialect::Sqlite.quote("a`b"), "`a``b`");
        assert_eq!(Dialect::Postgres.quote("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_json_extract_paths() {
        let sqlite = Dialect::Sqlite.json_extract("[[p.meta]]", "a.b[0]");
        assert!(sqlite.contains("JSON_EXTRACT([[p.meta]], '$.a.b[0]')"));
        assert!(sqlite.contains("'$.pb.a.b[0]'"));

        let array_root = Dialect::Sqlite.json_extract("[[p.meta]]", "[1]");
        assert!(array_root.contains("'$[1]'"));

        let pg = Dialect::Postgres.json_extract("[[p.meta]]", "a");
        assert!(pg.contains("jsonb_path_query_first"));
    }

    #[test]
    fn test_column_definitions() {
        let text = SchemaField::new("t", FieldOptions::Text(TextOptions::default()));
        let multi = SchemaField::new(
            "r",
            FieldOptions::Relation(RelationOptions::new("c", None)),
        );
        let json = SchemaField::new("j", FieldOptions::Json(Default::default()));

        assert_eq!(Dialect::Sqlite.column_definition(&text), "TEXT DEFAULT '' NOT NULL");
        assert_eq!(Dialect::Sqlite.column_definition(&multi), "TEXT DEFAULT '[]' NOT NULL");
        assert_eq!(Dialect::Sqlite.column_definition(&json), "JSON DEFAULT NULL");
        assert_eq!(Dialect::Postgres.column_definition(&json), "JSONB DEFAULT NULL");
    }

    #[test]
    fn test_join_condition() {
        assert_eq!(Dialect::Sqlite.join_condition(None), "");
        assert_eq!(Dialect::Postgres.join_condition(None), " ON TRUE");
        assert_eq!(Dialect::Sqlite.join_condition(Some("a = b")), " ON a = b");
    }

    #[test]
    fn test_shims_only_for_postgres() {
        assert!(Dialect::Sqlite.compat_shims().is_empty());
        assert!(Dialect::Postgres.compat_shims().contains("uuid_generate_v7"));
    }
}
