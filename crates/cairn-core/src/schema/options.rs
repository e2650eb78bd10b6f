//! Type-specific field options
//!
//! `FieldOptions` is a closed tagged union: the variant *is* the field type.
//! Each variant owns one options struct with a serde decode/encode pair, and
//! the raw `{"type": ..., "options": {...}}` wire shape is resolved through
//! [`FieldOptions::decode`] and [`FieldOptions::encode`].

use crate::error::{CoreError, CoreResult};
use crate::types::DateTime;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Field type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Text,
    Number,
    Bool,
    Email,
    Url,
    Editor,
    Date,
    Select,
    Json,
    File,
    Relation,
}

impl FieldType {
    /// Wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Bool => "bool",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Editor => "editor",
            FieldType::Date => "date",
            FieldType::Select => "select",
            FieldType::Json => "json",
            FieldType::File => "file",
            FieldType::Relation => "relation",
        }
    }

    /// Types whose value may be stored as a JSON array of strings
    pub fn is_arrayable(&self) -> bool {
        matches!(self, FieldType::Select | FieldType::File | FieldType::Relation)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "text" => FieldType::Text,
            "number" => FieldType::Number,
            "bool" => FieldType::Bool,
            "email" => FieldType::Email,
            "url" => FieldType::Url,
            "editor" => FieldType::Editor,
            "date" => FieldType::Date,
            "select" => FieldType::Select,
            "json" => FieldType::Json,
            "file" => FieldType::File,
            "relation" => FieldType::Relation,
            other => return Err(CoreError::UnknownFieldType(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextOptions {
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub pattern: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NumberOptions {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub no_decimal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoolOptions {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailOptions {
    pub except_domains: Vec<String>,
    pub only_domains: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UrlOptions {
    pub except_domains: Vec<String>,
    pub only_domains: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditorOptions {
    pub convert_urls: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateOptions {
    pub min: DateTime,
    pub max: DateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectOptions {
    pub max_select: usize,
    pub values: Vec<String>,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            max_select: 1,
            values: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JsonOptions {
    pub max_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileOptions {
    pub max_select: usize,
    pub max_size: usize,
    pub mime_types: Vec<String>,
    pub thumbs: Vec<String>,
    pub protected: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            max_select: 1,
            max_size: 5 << 20,
            mime_types: Vec::new(),
            thumbs: Vec::new(),
            protected: false,
        }
    }
}

/// Options of a relation field.
///
/// A missing `max_select`, or any value above 1, makes the relation
/// multi-valued.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelationOptions {
    pub collection_id: String,
    pub cascade_delete: bool,
    pub min_select: Option<usize>,
    pub max_select: Option<usize>,
    pub display_fields: Vec<String>,
}

impl RelationOptions {
    /// Relation pointing at `collection_id` with the given cardinality bound
    pub fn new(collection_id: impl Into<String>, max_select: Option<usize>) -> Self {
        Self {
            collection_id: collection_id.into(),
            max_select,
            ..Default::default()
        }
    }

    pub fn is_multiple(&self) -> bool {
        self.max_select.map_or(true, |max| max > 1)
    }
}

/// Options of a field, keyed by field type
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOptions {
    Text(TextOptions),
    Number(NumberOptions),
    Bool(BoolOptions),
    Email(EmailOptions),
    Url(UrlOptions),
    Editor(EditorOptions),
    Date(DateOptions),
    Select(SelectOptions),
    Json(JsonOptions),
    File(FileOptions),
    Relation(RelationOptions),
}

impl FieldOptions {
    /// Default options for a field type
    pub fn default_for(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text => FieldOptions::Text(Default::default()),
            FieldType::Number => FieldOptions::Number(Default::default()),
            FieldType::Bool => FieldOptions::Bool(Default::default()),
            FieldType::Email => FieldOptions::Email(Default::default()),
            FieldType::Url => FieldOptions::Url(Default::default()),
            FieldType::Editor => FieldOptions::Editor(Default::default()),
            FieldType::Date => FieldOptions::Date(Default::default()),
            FieldType::Select => FieldOptions::Select(Default::default()),
            FieldType::Json => FieldOptions::Json(Default::default()),
            FieldType::File => FieldOptions::File(Default::default()),
            FieldType::Relation => FieldOptions::Relation(Default::default()),
        }
    }

    /// Decode the raw options payload of a field of type `field_type`.
    ///
    /// A `null` payload yields the type defaults.
    pub fn decode(field_name: &str, field_type: FieldType, raw: Value) -> CoreResult<Self> {
        if raw.is_null() {
            return Ok(Self::default_for(field_type));
        }

        fn typed<T: DeserializeOwned>(field: &str, raw: Value) -> CoreResult<T> {
            serde_json::from_value(raw).map_err(|e| CoreError::InvalidFieldOptions {
                field: field.to_string(),
                reason: e.to_string(),
            })
        }

        Ok(match field_type {
            FieldType::Text => FieldOptions::Text(typed(field_name, raw)?),
            FieldType::Number => FieldOptions::Number(typed(field_name, raw)?),
            FieldType::Bool => FieldOptions::Bool(typed(field_name, raw)?),
            FieldType::Email => FieldOptions::Email(typed(field_name, raw)?),
            FieldType::Url => FieldOptions::Url(typed(field_name, raw)?),
            FieldType::Editor => FieldOptions::Editor(typed(field_name, raw)?),
            FieldType::Date => FieldOptions::Date(typed(field_name, raw)?),
            FieldType::Select => FieldOptions::Select(typed(field_name, raw)?),
            FieldType::Json => FieldOptions::Json(typed(field_name, raw)?),
            FieldType::File => FieldOptions::File(typed(field_name, raw)?),
            FieldType::Relation => FieldOptions::Relation(typed(field_name, raw)?),
        })
    }

    /// Encode the options payload (without the type tag)
    pub fn encode(&self) -> CoreResult<Value> {
        let value = match self {
            FieldOptions::Text(o) => serde_json::to_value(o)?,
            FieldOptions::Number(o) => serde_json::to_value(o)?,
            FieldOptions::Bool(o) => serde_json::to_value(o)?,
            FieldOptions::Email(o) => serde_json::to_value(o)?,
            FieldOptions::Url(o) => serde_json::to_value(o)?,
            FieldOptions::Editor(o) => serde_json::to_value(o)?,
            FieldOptions::Date(o) => serde_json::to_value(o)?,
            FieldOptions::Select(o) => serde_json::to_value(o)?,
            FieldOptions::Json(o) => serde_json::to_value(o)?,
            FieldOptions::File(o) => serde_json::to_value(o)?,
            FieldOptions::Relation(o) => serde_json::to_value(o)?,
        };
        Ok(value)
    }

    /// Type tag of this variant
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldOptions::Text(_) => FieldType::Text,
            FieldOptions::Number(_) => FieldType::Number,
            FieldOptions::Bool(_) => FieldType::Bool,
            FieldOptions::Email(_) => FieldType::Email,
            FieldOptions::Url(_) => FieldType::Url,
            FieldOptions::Editor(_) => FieldType::Editor,
            FieldOptions::Date(_) => FieldType::Date,
            FieldOptions::Select(_) => FieldType::Select,
            FieldOptions::Json(_) => FieldType::Json,
            FieldOptions::File(_) => FieldType::File,
            FieldOptions::Relation(_) => FieldType::Relation,
        }
    }

    /// Whether the field stores a list of values
    pub fn is_multiple(&self) -> bool {
        match self {
            FieldOptions::Select(o) => o.max_select > 1,
            FieldOptions::File(o) => o.max_select > 1,
            FieldOptions::Relation(o) => o.is_multiple(),
            _ => false,
        }
    }

    pub fn as_relation(&self) -> Option<&RelationOptions> {
        match self {
            FieldOptions::Relation(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_relation_mut(&mut self) -> Option<&mut RelationOptions> {
        match self {
            FieldOptions::Relation(o) => Some(o),
            _ => None,
        }
    }

    /// Check the options for internal consistency
    pub fn validate(&self, field_name: &str) -> CoreResult<()> {
        let invalid = |reason: &str| CoreError::InvalidFieldOptions {
            field: field_name.to_string(),
            reason: reason.to_string(),
        };

        match self {
            FieldOptions::Text(o) => {
                if let (Some(min), Some(max)) = (o.min, o.max) {
                    if min > max {
                        return Err(invalid("min must not exceed max"));
                    }
                }
            }
            FieldOptions::Number(o) => {
                if let (Some(min), Some(max)) = (o.min, o.max) {
                    if min > max {
                        return Err(invalid("min must not exceed max"));
                    }
                }
            }
            FieldOptions::Select(o) => {
                if o.max_select == 0 {
                    return Err(invalid("maxSelect must be at least 1"));
                }
                if o.values.is_empty() {
                    return Err(invalid("values must not be empty"));
                }
            }
            FieldOptions::File(o) => {
                if o.max_select == 0 {
                    return Err(invalid("maxSelect must be at least 1"));
                }
                if o.max_size == 0 {
                    return Err(invalid("maxSize must be at least 1"));
                }
            }
            FieldOptions::Relation(o) => {
                if o.collection_id.is_empty() {
                    return Err(invalid("collectionId is required"));
                }
                if o.max_select == Some(0) {
                    return Err(invalid("maxSelect must be at least 1"));
                }
                if let (Some(min), Some(max)) = (o.min_select, o.max_select) {
                    if min > max {
                        return Err(invalid("minSelect must not exceed maxSelect"));
                    }
                }
            }
            FieldOptions::Date(o) => {
                if !o.min.is_zero() && !o.max.is_zero() && o.min > o.max {
                    return Err(invalid("min must not exceed max"));
                }
            }
            FieldOptions::Bool(_)
            | FieldOptions::Email(_)
            | FieldOptions::Url(_)
            | FieldOptions::Editor(_)
            | FieldOptions::Json(_) => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("text", FieldType::Text)]
    #[test_case("number", FieldType::Number)]
    #[test_case("relation", FieldType::Relation)]
    #[test_case("json", FieldType::Json)]
    fn test_field_type_parse(raw: &str, expected: FieldType) {
        assert_eq!(raw.parse::<FieldType>().unwrap(), expected);
        assert_eq!(expected.as_str(), raw);
    }

    #[test]
    fn test_unknown_field_type() {
        assert!(matches!(
            "blob".parse::<FieldType>(),
            Err(CoreError::UnknownFieldType(_))
        ));
    }

    #[test]
    fn test_decode_relation_options() {
        let raw = json!({"collectionId": "abc", "maxSelect": 1, "cascadeDelete": true});
        let opts = FieldOptions::decode("author", FieldType::Relation, raw).unwrap();
        let rel = opts.as_relation().unwrap();
        assert_eq!(rel.collection_id, "abc");
        assert!(rel.cascade_delete);
        assert!(!opts.is_multiple());
    }

    #[test]
    fn test_decode_null_uses_defaults() {
        let opts = FieldOptions::decode("tags", FieldType::Relation, Value::Null).unwrap();
        assert!(opts.is_multiple());
    }

    #[test]
    fn test_decode_mismatched_payload_fails() {
        let raw = json!({"maxSelect": "many"});
        let err = FieldOptions::decode("tags", FieldType::Select, raw).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFieldOptions { .. }));
    }

    #[test]
    fn test_encode_keeps_camel_case() {
        let opts = FieldOptions::Select(SelectOptions {
            max_select: 2,
            values: vec!["a".into(), "b".into()],
        });
        assert_eq!(opts.encode().unwrap(), json!({"maxSelect": 2, "values": ["a", "b"]}));
    }

    #[test]
    fn test_validate_select_requires_values() {
        let opts = FieldOptions::Select(SelectOptions::default());
        assert!(opts.validate("status").is_err());
    }

    #[test]
    fn test_validate_relation_requires_collection() {
        let opts = FieldOptions::Relation(RelationOptions::default());
        assert!(opts.validate("author").is_err());

        let opts = FieldOptions::Relation(RelationOptions::new("users", Some(1)));
        assert!(opts.validate("author").is_ok());
    }
}
