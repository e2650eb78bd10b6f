//! Field path resolution for record collections
//!
//! [`RecordFieldResolver`] understands relation hops (`author.name`),
//! cross-collection lookups (`@collection.users.email`), request data
//! (`@request.auth.id`, `@request.data.title`), JSON paths and the `:each`,
//! `:length` and `:isset` modifiers. Every hop is joined onto the main query
//! and mirrored into a [`MultiMatchSubquery`](crate::search::MultiMatchSubquery)
//! so multi-valued paths can be compiled with "any related row" semantics.

mod runner;

use crate::dao::Dao;
use crate::dialect::Dialect;
use crate::error::{SqliteError, SqliteResult};
use crate::search::{AllowedFields, FieldResolver, Join, Params, ResolverResult, SelectQuery};
use cairn_core::schema::FIELD_NAME_EMAIL;
use cairn_core::{Collection, FieldType, Record};
use once_cell::sync::Lazy;
use runner::Runner;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::trace;

/// Path shapes accepted before any resolution work happens
pub const DEFAULT_ALLOWED_FIELDS: [&str; 8] = [
    r"^\w+[\w\.\:]*$",
    r"^\@request\.context$",
    r"^\@request\.method$",
    r"^\@request\.auth\.[\w\.\:]*\w+$",
    r"^\@request\.data\.[\w\.\:]*\w+$",
    r"^\@request\.query\.[\w\.\:]*\w+$",
    r"^\@request\.headers\.\w+$",
    r"^\@collection\.\w+(\:\w+)?\.[\w\.\:]*\w+$",
];

static DEFAULT_ALLOWED: Lazy<AllowedFields> =
    Lazy::new(|| AllowedFields::new(DEFAULT_ALLOWED_FIELDS).unwrap());

/// Source of collection definitions for the resolver
pub trait CollectionLookup {
    fn find_collection(&self, name_or_id: &str) -> SqliteResult<Arc<Collection>>;
}

impl CollectionLookup for Dao<'_> {
    fn find_collection(&self, name_or_id: &str) -> SqliteResult<Arc<Collection>> {
        self.find_collection_by_name_or_id(name_or_id)
    }
}

impl CollectionLookup for Vec<Arc<Collection>> {
    fn find_collection(&self, name_or_id: &str) -> SqliteResult<Arc<Collection>> {
        self.iter()
            .find(|c| c.base.id == name_or_id || c.name.eq_ignore_ascii_case(name_or_id))
            .cloned()
            .ok_or_else(|| SqliteError::NotFound(format!("collection {:?}", name_or_id)))
    }
}

/// Request data the `@request.*` fields resolve against
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub context: String,
    pub method: String,
    pub query: Map<String, Value>,
    pub data: Map<String, Value>,
    pub headers: Map<String, Value>,
    pub auth_record: Option<Record>,
}

impl RequestInfo {
    /// Nested map view of the request. The auth email is always included.
    fn to_static_map(&self) -> Map<String, Value> {
        let auth = match &self.auth_record {
            Some(record) => {
                let mut export = record.public_export();
                export.insert(FIELD_NAME_EMAIL.to_string(), record.get(FIELD_NAME_EMAIL));
                Value::Object(export)
            }
            None => Value::Null,
        };

        let mut map = Map::new();
        map.insert("context".to_string(), Value::String(self.context.clone()));
        map.insert("method".to_string(), Value::String(self.method.clone()));
        map.insert("query".to_string(), Value::Object(self.query.clone()));
        map.insert("headers".to_string(), Value::Object(self.headers.clone()));
        map.insert("data".to_string(), Value::Object(self.data.clone()));
        map.insert("auth".to_string(), auth);
        map
    }
}

/// Resolver for filters over the records of one base collection
pub struct RecordFieldResolver<'a> {
    lookup: &'a dyn CollectionLookup,
    base_collection: Arc<Collection>,
    request_info: Option<RequestInfo>,
    static_request_info: Map<String, Value>,
    allow_hidden_fields: bool,
    allowed_fields: AllowedFields,
    dialect: Dialect,
    loaded_collections: Vec<Arc<Collection>>,
    joins: Vec<Join>,
    join_params: Params,
}

impl<'a> RecordFieldResolver<'a> {
    pub fn new(
        lookup: &'a dyn CollectionLookup,
        base_collection: Arc<Collection>,
        request_info: Option<RequestInfo>,
        allow_hidden_fields: bool,
    ) -> Self {
        let static_request_info = request_info
            .as_ref()
            .map(RequestInfo::to_static_map)
            .unwrap_or_default();

        Self {
            lookup,
            loaded_collections: vec![Arc::clone(&base_collection)],
            base_collection,
            request_info,
            static_request_info,
            allow_hidden_fields,
            allowed_fields: DEFAULT_ALLOWED.clone(),
            dialect: Dialect::default(),
            joins: Vec::new(),
            join_params: Params::new(),
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Replace the accepted path shapes (literal names or `^...$` patterns).
    /// An empty list accepts every path.
    pub fn with_allowed_fields<S: AsRef<str>>(
        mut self,
        allowed: impl IntoIterator<Item = S>,
    ) -> SqliteResult<Self> {
        self.allowed_fields = AllowedFields::new(allowed)?;
        Ok(self)
    }

    pub fn base_collection(&self) -> &Arc<Collection> {
        &self.base_collection
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    fn load_collection(&mut self, name_or_id: &str) -> SqliteResult<Arc<Collection>> {
        if let Some(found) = self
            .loaded_collections
            .iter()
            .find(|c| c.base.id == name_or_id || c.name.eq_ignore_ascii_case(name_or_id))
        {
            return Ok(Arc::clone(found));
        }

        let collection = self.lookup.find_collection(name_or_id)?;
        self.loaded_collections.push(Arc::clone(&collection));
        Ok(collection)
    }

    /// Register a join, replacing any earlier one with the same alias
    fn register_join(&mut self, join: Join) {
        trace!(table = %join.table, alias = %join.alias, "Registering join");
        match self.joins.iter_mut().find(|j| j.alias == join.alias) {
            Some(existing) => *existing = join,
            None => self.joins.push(join),
        }
    }

    /// Resolve `@request.*` segments (without the `@request` prefix) to a bound value.
    /// Missing keys resolve to NULL; `:isset` becomes a TRUE/FALSE literal.
    fn resolve_static_request_field(&self, path: &[String]) -> SqliteResult<ResolverResult> {
        let Some((last, parents)) = path.split_last() else {
            return Err(SqliteError::Resolve("empty @request path".to_string()));
        };
        let (last, modifier) = runner::split_modifier(last)?;

        let mut current = Some(&self.static_request_info);
        let mut value: Option<&Value> = None;
        for key in parents.iter().map(String::as_str).chain(std::iter::once(last)) {
            value = current.and_then(|map| map.get(key));
            current = value.and_then(Value::as_object);
        }

        if modifier == Some(runner::Modifier::Isset) {
            let identifier = if value.is_some() { "TRUE" } else { "FALSE" };
            return Ok(ResolverResult::identifier(identifier));
        }

        let value = match value {
            None | Some(Value::Null) => return Ok(ResolverResult::null()),
            Some(Value::String(s)) => {
                let is_number = self
                    .base_collection
                    .schema
                    .get_field_by_name(last)
                    .is_some_and(|f| f.field_type() == FieldType::Number);
                match s.trim().parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                    Some(n) if is_number => Value::Number(n),
                    _ => Value::String(s.clone()),
                }
            }
            Some(v @ (Value::Bool(_) | Value::Number(_))) => v.clone(),
            Some(other) => Value::String(other.to_string()),
        };

        let placeholder = format!("f{}", cairn_core::utils::random_string(5));
        Ok(ResolverResult {
            identifier: format!("{{:{}}}", placeholder),
            params: Params::from([(placeholder, value)]),
            ..ResolverResult::default()
        })
    }
}

impl FieldResolver for RecordFieldResolver<'_> {
    fn resolve(&mut self, field: &str) -> SqliteResult<ResolverResult> {
        Runner::new(self, field).run()
    }

    fn update_query(&self, query: &mut SelectQuery) {
        if self.joins.is_empty() {
            return;
        }
        query.distinct(true);
        for join in &self.joins {
            query.left_join(join.clone());
        }
        query.bind(self.join_params.clone());
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }
}
