//! Filter/sort compilation and the select query they are applied to
//!
//! A [`FieldResolver`] turns a field path into a SQL identifier plus whatever
//! joins the path needs. The filter and sort compilers only ever talk to the
//! resolver trait, so the same expression language works over record
//! collections ([`crate::resolver::RecordFieldResolver`]) and plain tables
//! ([`SimpleFieldResolver`]).

mod filter;
mod multi_match;
mod simple;
mod sort;

pub use filter::{build_filter, parse_filter, FilterExpr, Operand, Operator, Sign};
pub use multi_match::MultiMatchSubquery;
pub use simple::SimpleFieldResolver;
pub use sort::{SortDirection, SortField, RANDOM_SORT_KEY};

use crate::dialect::Dialect;
use crate::error::{SqliteError, SqliteResult};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// Named bind parameters (names without the `:` prefix)
pub type Params = HashMap<String, Value>;

/// SQL fragment together with the parameters it references
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    pub sql: String,
    pub params: Params,
}

impl Expression {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Params) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Outcome of resolving one field path
#[derive(Debug, Clone, Default)]
pub struct ResolverResult {
    /// SQL scalar expression (placeholders allowed)
    pub identifier: String,
    /// Compare with `IS`/`IS NOT` instead of coalescing to ''
    pub no_coalesce: bool,
    pub params: Params,
    /// Shadow join chain, present when the path crosses a multi-valued hop
    pub multi_match: Option<MultiMatchSubquery>,
    /// Extra condition AND-ed onto any comparison using this operand
    pub guard: Option<String>,
}

impl ResolverResult {
    pub fn identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    pub fn null() -> Self {
        Self::identifier("NULL")
    }
}

/// Resolves filter/sort field paths against some data source
pub trait FieldResolver {
    fn resolve(&mut self, field: &str) -> SqliteResult<ResolverResult>;

    /// Apply the joins accumulated while resolving
    fn update_query(&self, query: &mut SelectQuery);

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }
}

/// `LEFT JOIN` registration
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Table expression: `{{name}}` or a table-valued function call
    pub table: String,
    pub alias: String,
    pub on: Option<String>,
}

impl Join {
    pub fn new(table: impl Into<String>, alias: impl Into<String>, on: Option<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            on,
        }
    }

    pub fn build(&self, dialect: Dialect) -> String {
        format!(
            "LEFT JOIN {} [[{}]]{}",
            self.table,
            self.alias,
            dialect.join_condition(self.on.as_deref())
        )
    }
}

/// Minimal select builder over a single aliased table
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    table: String,
    alias: String,
    columns: Vec<String>,
    distinct: bool,
    joins: Vec<Join>,
    conditions: Vec<String>,
    order_by: Vec<String>,
    limit: usize,
    offset: usize,
    params: Params,
}

impl SelectQuery {
    /// `SELECT [[alias.*]] FROM {{table}} [[alias]]`
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        Self {
            columns: vec![format!("[[{}.*]]", alias)],
            table: table.into(),
            alias,
            distinct: false,
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: 0,
            offset: 0,
            params: Params::new(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn distinct(&mut self, distinct: bool) {
        self.distinct = distinct;
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn left_join(&mut self, join: Join) {
        self.joins.push(join);
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn and_where(&mut self, expr: Expression) {
        self.conditions.push(expr.sql);
        self.params.extend(expr.params);
    }

    pub fn bind(&mut self, params: Params) {
        self.params.extend(params);
    }

    pub fn order_by(&mut self, clause: impl Into<String>) {
        self.order_by.push(clause.into());
    }

    /// Zero means no limit
    pub fn limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    /// Statement with neutral placeholders, plus its parameters
    pub fn build(&self, dialect: Dialect) -> (String, Params) {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.columns.join(", "));
        sql.push_str(&format!(" FROM {{{{{}}}}} [[{}]]", self.table, self.alias));

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.build(dialect));
        }

        if !self.conditions.is_empty() {
            let conditions: Vec<String> =
                self.conditions.iter().map(|c| format!("({})", c)).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        match (self.limit, self.offset, dialect) {
            (0, 0, _) => {}
            (0, offset, Dialect::Sqlite) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (0, offset, Dialect::Postgres) => sql.push_str(&format!(" OFFSET {}", offset)),
            (limit, 0, _) => sql.push_str(&format!(" LIMIT {}", limit)),
            (limit, offset, _) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
        }

        (sql, self.params.clone())
    }
}

/// Accepted field path shapes, compiled once.
///
/// Entries wrapped in `^...$` are regular expressions, everything else is
/// compared literally.
#[derive(Debug, Clone, Default)]
pub struct AllowedFields {
    literals: Vec<String>,
    patterns: Vec<Regex>,
}

impl AllowedFields {
    pub fn new<S: AsRef<str>>(entries: impl IntoIterator<Item = S>) -> SqliteResult<Self> {
        let mut allowed = Self::default();
        for entry in entries {
            let entry = entry.as_ref();
            if entry.len() > 1 && entry.starts_with('^') && entry.ends_with('$') {
                let re = Regex::new(entry).map_err(|e| {
                    SqliteError::Resolve(format!("invalid allowed field pattern {:?}: {}", entry, e))
                })?;
                allowed.patterns.push(re);
            } else {
                allowed.literals.push(entry.to_string());
            }
        }
        Ok(allowed)
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.patterns.is_empty()
    }

    pub fn is_allowed(&self, field: &str) -> bool {
        self.literals.iter().any(|l| l == field)
            || self.patterns.iter().any(|re| re.is_match(field))
    }
}

/// JSON path (without the `$` root) from dotted segments; numeric segments become indices
pub fn json_path(segments: &[&str]) -> String {
    let mut path = String::new();
    for segment in segments {
        if segment.parse::<usize>().is_ok() {
            path.push_str(&format!("[{}]", segment));
        } else {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(&cairn_core::utils::columnify(segment));
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_query_build() {
        let mut query = SelectQuery::new("posts", "posts");
        query.distinct(true);
        query.left_join(Join::new(
            "{{users}}",
            "posts_author",
            Some("[[posts_author.id]] = [[posts.author]]".to_string()),
        ));
        query.and_where(Expression::with_params(
            "[[posts_author.name]] = {:name}",
            Params::from([("name".to_string(), json!("bob"))]),
        ));
        query.order_by("[[posts.created]] DESC");
        query.limit(10);

        let (sql, params) = query.build(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT DISTINCT [[posts.*]] FROM {{posts}} [[posts]] LEFT JOIN {{users}} [[posts_author]] ON [[posts_author.id]] = [[posts.author]] WHERE ([[posts_author.name]] = {:name}) ORDER BY [[posts.created]] DESC LIMIT 10"
        );
        assert_eq!(params["name"], json!("bob"));
    }

    #[test]
    fn test_offset_without_limit() {
        let mut query = SelectQuery::new("posts", "p");
        query.offset(5);
        assert!(query.build(Dialect::Sqlite).0.ends_with("LIMIT -1 OFFSET 5"));
        assert!(query.build(Dialect::Postgres).0.ends_with(" OFFSET 5"));
    }

    #[test]
    fn test_allowed_fields() {
        let allowed = AllowedFields::new([r"^\w+$", "@request.method"]).expect("Failed to compile");
        assert!(allowed.is_allowed("title"));
        assert!(allowed.is_allowed("@request.method"));
        assert!(!allowed.is_allowed("a.b"));
        assert!(!allowed.is_allowed("@request.methods"));
        assert!(!AllowedFields::default().is_allowed("title"));
    }

    #[test]
    fn test_invalid_allowed_pattern_is_rejected() {
        let err = AllowedFields::new([r"^(unclosed$"]).unwrap_err();
        assert!(matches!(err, SqliteError::Resolve(_)));
    }

    #[test]
    fn test_json_path() {
        assert_eq!(json_path(&["a", "b"]), "a.b");
        assert_eq!(json_path(&["a", "0", "c"]), "a[0].c");
        assert_eq!(json_path(&["1", "x"]), "[1].x");
    }
}
