//! Collection (logical table) definition

use super::{BaseModel, Model};
use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;
use crate::types::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;

/// Table holding collection definitions
pub const COLLECTIONS_TABLE: &str = "_collections";

static COLLECTION_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionType {
    Base,
    Auth,
    View,
}

impl CollectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionType::Base => "base",
            CollectionType::Auth => "auth",
            CollectionType::View => "view",
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CollectionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(CollectionType::Base),
            "auth" => Ok(CollectionType::Auth),
            "view" => Ok(CollectionType::View),
            other => Err(CoreError::UnknownCollectionType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseOptions {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthOptions {
    pub allow_username_auth: bool,
    pub allow_email_auth: bool,
    pub require_email: bool,
    pub min_password_length: usize,
    pub only_email_domains: Vec<String>,
    pub except_email_domains: Vec<String>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            allow_username_auth: true,
            allow_email_auth: true,
            require_email: false,
            min_password_length: 8,
            only_email_domains: Vec::new(),
            except_email_domains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewOptions {
    pub query: String,
}

/// Collection options keyed by collection type
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOptions {
    Base(BaseOptions),
    Auth(AuthOptions),
    View(ViewOptions),
}

impl CollectionOptions {
    pub fn collection_type(&self) -> CollectionType {
        match self {
            CollectionOptions::Base(_) => CollectionType::Base,
            CollectionOptions::Auth(_) => CollectionType::Auth,
            CollectionOptions::View(_) => CollectionType::View,
        }
    }

    fn decode(collection_type: CollectionType, raw: Value) -> CoreResult<Self> {
        let raw = if raw.is_null() {
            Value::Object(Map::new())
        } else {
            raw
        };
        Ok(match collection_type {
            CollectionType::Base => CollectionOptions::Base(serde_json::from_value(raw)?),
            CollectionType::Auth => CollectionOptions::Auth(serde_json::from_value(raw)?),
            CollectionType::View => CollectionOptions::View(serde_json::from_value(raw)?),
        })
    }

    fn encode(&self) -> CoreResult<Value> {
        Ok(match self {
            CollectionOptions::Base(o) => serde_json::to_value(o)?,
            CollectionOptions::Auth(o) => serde_json::to_value(o)?,
            CollectionOptions::View(o) => serde_json::to_value(o)?,
        })
    }
}

/// Logical table definition: fields, indexes and access rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCollection", into = "RawCollection")]
pub struct Collection {
    pub base: BaseModel,
    pub name: String,
    pub system: bool,
    pub schema: Schema,
    pub indexes: Vec<String>,
    pub list_rule: Option<String>,
    pub view_rule: Option<String>,
    pub create_rule: Option<String>,
    pub update_rule: Option<String>,
    pub delete_rule: Option<String>,
    pub options: CollectionOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCollection {
    #[serde(default)]
    id: String,
    #[serde(default)]
    created: DateTime,
    #[serde(default)]
    updated: DateTime,
    name: String,
    #[serde(rename = "type", default = "default_type")]
    collection_type: String,
    #[serde(default)]
    system: bool,
    #[serde(default)]
    schema: Schema,
    #[serde(default)]
    indexes: Vec<String>,
    #[serde(default)]
    list_rule: Option<String>,
    #[serde(default)]
    view_rule: Option<String>,
    #[serde(default)]
    create_rule: Option<String>,
    #[serde(default)]
    update_rule: Option<String>,
    #[serde(default)]
    delete_rule: Option<String>,
    #[serde(default)]
    options: Value,
}

fn default_type() -> String {
    CollectionType::Base.as_str().to_string()
}

impl TryFrom<RawCollection> for Collection {
    type Error = CoreError;

    fn try_from(raw: RawCollection) -> Result<Self, Self::Error> {
        let collection_type: CollectionType = raw.collection_type.parse()?;
        let options = CollectionOptions::decode(collection_type, raw.options)?;
        let mut base = BaseModel::default();
        base.id = raw.id;
        base.created = raw.created;
        base.updated = raw.updated;
        Ok(Self {
            base,
            name: raw.name,
            system: raw.system,
            schema: raw.schema,
            indexes: raw.indexes,
            list_rule: raw.list_rule,
            view_rule: raw.view_rule,
            create_rule: raw.create_rule,
            update_rule: raw.update_rule,
            delete_rule: raw.delete_rule,
            options,
        })
    }
}

impl From<Collection> for RawCollection {
    fn from(c: Collection) -> Self {
        Self {
            collection_type: c.collection_type().as_str().to_string(),
            options: c.options.encode().unwrap_or(Value::Null),
            id: c.base.id,
            created: c.base.created,
            updated: c.base.updated,
            name: c.name,
            system: c.system,
            schema: c.schema,
            indexes: c.indexes,
            list_rule: c.list_rule,
            view_rule: c.view_rule,
            create_rule: c.create_rule,
            update_rule: c.update_rule,
            delete_rule: c.delete_rule,
        }
    }
}

impl Collection {
    fn with_options(name: impl Into<String>, options: CollectionOptions) -> Self {
        Self {
            base: BaseModel::default(),
            name: name.into(),
            system: false,
            schema: Schema::default(),
            indexes: Vec::new(),
            list_rule: None,
            view_rule: None,
            create_rule: None,
            update_rule: None,
            delete_rule: None,
            options,
        }
    }

    pub fn new_base(name: impl Into<String>) -> Self {
        Self::with_options(name, CollectionOptions::Base(BaseOptions::default()))
    }

    pub fn new_auth(name: impl Into<String>) -> Self {
        Self::with_options(name, CollectionOptions::Auth(AuthOptions::default()))
    }

    pub fn new_view(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self::with_options(
            name,
            CollectionOptions::View(ViewOptions {
                query: query.into(),
            }),
        )
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.base.id = id.into();
        self
    }

    pub fn collection_type(&self) -> CollectionType {
        self.options.collection_type()
    }

    pub fn is_base(&self) -> bool {
        self.collection_type() == CollectionType::Base
    }

    pub fn is_auth(&self) -> bool {
        self.collection_type() == CollectionType::Auth
    }

    pub fn is_view(&self) -> bool {
        self.collection_type() == CollectionType::View
    }

    /// Check the name and the schema
    pub fn validate(&self) -> CoreResult<()> {
        if !COLLECTION_NAME_RE.is_match(&self.name) {
            return Err(CoreError::InvalidCollection(format!(
                "invalid collection name {:?}",
                self.name
            )));
        }
        if let CollectionOptions::View(view) = &self.options {
            if view.query.trim().is_empty() {
                return Err(CoreError::InvalidCollection(
                    "view collections require a select query".to_string(),
                ));
            }
        }
        self.schema.validate()
    }

    /// Decode a `_collections` row. JSON columns arrive as text.
    pub fn from_row(row: &Map<String, Value>) -> CoreResult<Self> {
        let mut normalized = row.clone();

        for key in ["schema", "indexes", "options"] {
            if let Some(Value::String(text)) = normalized.get(key) {
                let decoded = if text.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(text)?
                };
                normalized.insert(key.to_string(), decoded);
            }
        }

        for key in ["schema", "indexes"] {
            if normalized.get(key).is_some_and(Value::is_null) {
                normalized.remove(key);
            }
        }

        if let Some(Value::Number(n)) = normalized.get("system") {
            let flag = n.as_i64().unwrap_or_default() != 0;
            normalized.insert("system".to_string(), Value::Bool(flag));
        }

        let mut collection: Collection = serde_json::from_value(Value::Object(normalized))?;
        collection.base.mark_as_not_new();
        Ok(collection)
    }
}

impl Model for Collection {
    fn table_name(&self) -> String {
        COLLECTIONS_TABLE.to_string()
    }

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldOptions, SchemaField, TextOptions};
    use serde_json::json;

    #[test]
    fn test_type_helpers() {
        assert!(Collection::new_base("posts").is_base());
        assert!(Collection::new_auth("users").is_auth());
        assert!(Collection::new_view("stats", "select 1").is_view());
    }

    #[test]
    fn test_serialize_flattens_type_and_options() {
        let c = Collection::new_auth("users").with_id("c1");
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"], "auth");
        assert_eq!(v["id"], "c1");
        assert_eq!(v["options"]["minPasswordLength"], 8);
        assert_eq!(v["listRule"], Value::Null);
    }

    #[test]
    fn test_from_row_decodes_json_text() {
        let schema = json!([{"id": "f1", "name": "title", "type": "text", "options": {}}]);
        let row = json!({
            "id": "c1",
            "created": "2024-01-01 00:00:00.000Z",
            "updated": "2024-01-01 00:00:00.000Z",
            "name": "posts",
            "type": "base",
            "system": 0,
            "schema": schema.to_string(),
            "indexes": "[]",
            "listRule": null,
            "viewRule": "",
            "createRule": null,
            "updateRule": null,
            "deleteRule": null,
            "options": "{}"
        });
        let c = Collection::from_row(row.as_object().unwrap()).unwrap();
        assert_eq!(c.name, "posts");
        assert!(!c.base.is_new());
        assert_eq!(c.schema.fields().len(), 1);
        assert_eq!(c.view_rule.as_deref(), Some(""));
    }

    #[test]
    fn test_validate_name() {
        let c = Collection::new_base("bad name");
        assert!(c.validate().is_err());

        let c = Collection::new_base("posts").with_schema(Schema::new([SchemaField::new(
            "title",
            FieldOptions::Text(TextOptions::default()),
        )]));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_view_requires_query() {
        assert!(Collection::new_view("stats", " ").validate().is_err());
    }
}
