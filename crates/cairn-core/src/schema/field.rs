//! Schema field definition and value normalisation

use super::options::{FieldOptions, FieldType};
use crate::error::{CoreError, CoreResult};
use crate::types::DateTime;
use crate::utils::{scalar_to_string, to_bool, to_unique_string_slice};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

pub const FIELD_NAME_ID: &str = "id";
pub const FIELD_NAME_CREATED: &str = "created";
pub const FIELD_NAME_UPDATED: &str = "updated";
pub const FIELD_NAME_COLLECTION_ID: &str = "collectionId";
pub const FIELD_NAME_COLLECTION_NAME: &str = "collectionName";
pub const FIELD_NAME_EXPAND: &str = "expand";
pub const FIELD_NAME_USERNAME: &str = "username";
pub const FIELD_NAME_EMAIL: &str = "email";
pub const FIELD_NAME_EMAIL_VISIBILITY: &str = "emailVisibility";
pub const FIELD_NAME_VERIFIED: &str = "verified";
pub const FIELD_NAME_TOKEN_KEY: &str = "tokenKey";
pub const FIELD_NAME_PASSWORD_HASH: &str = "passwordHash";
pub const FIELD_NAME_LAST_RESET_SENT_AT: &str = "lastResetSentAt";
pub const FIELD_NAME_LAST_VERIFICATION_SENT_AT: &str = "lastVerificationSentAt";

/// Columns every record table has
pub fn base_model_field_names() -> [&'static str; 3] {
    [FIELD_NAME_ID, FIELD_NAME_CREATED, FIELD_NAME_UPDATED]
}

/// Virtual keys present in record exports but not stored as columns
pub fn system_field_names() -> [&'static str; 3] {
    [
        FIELD_NAME_COLLECTION_ID,
        FIELD_NAME_COLLECTION_NAME,
        FIELD_NAME_EXPAND,
    ]
}

/// Extra columns of auth collection tables
pub fn auth_field_names() -> [&'static str; 8] {
    [
        FIELD_NAME_USERNAME,
        FIELD_NAME_EMAIL,
        FIELD_NAME_EMAIL_VISIBILITY,
        FIELD_NAME_VERIFIED,
        FIELD_NAME_TOKEN_KEY,
        FIELD_NAME_PASSWORD_HASH,
        FIELD_NAME_LAST_RESET_SENT_AT,
        FIELD_NAME_LAST_VERIFICATION_SENT_AT,
    ]
}

static FIELD_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").unwrap());

/// One typed column definition of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSchemaField", into = "RawSchemaField")]
pub struct SchemaField {
    pub id: String,
    pub name: String,
    pub system: bool,
    pub required: bool,
    pub unique: bool,
    pub presentable: bool,
    pub options: FieldOptions,
}

/// Wire form: the type tag travels next to an untyped options payload
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSchemaField {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    system: bool,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    presentable: bool,
    #[serde(default)]
    options: Value,
}

impl TryFrom<RawSchemaField> for SchemaField {
    type Error = CoreError;

    fn try_from(raw: RawSchemaField) -> Result<Self, Self::Error> {
        let field_type: FieldType = raw.field_type.parse()?;
        let options = FieldOptions::decode(&raw.name, field_type, raw.options)?;
        Ok(Self {
            id: raw.id,
            name: raw.name,
            system: raw.system,
            required: raw.required,
            unique: raw.unique,
            presentable: raw.presentable,
            options,
        })
    }
}

impl From<SchemaField> for RawSchemaField {
    fn from(field: SchemaField) -> Self {
        Self {
            field_type: field.options.field_type().as_str().to_string(),
            options: field.options.encode().unwrap_or(Value::Null),
            id: field.id,
            name: field.name,
            system: field.system,
            required: field.required,
            unique: field.unique,
            presentable: field.presentable,
        }
    }
}

impl SchemaField {
    /// New field with the given name and options (id assigned on schema insert)
    pub fn new(name: impl Into<String>, options: FieldOptions) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            system: false,
            required: false,
            unique: false,
            presentable: false,
            options,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn field_type(&self) -> FieldType {
        self.options.field_type()
    }

    /// Whether the stored value is a list
    pub fn is_multiple(&self) -> bool {
        self.options.is_multiple()
    }

    /// Check name and options
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |reason: &str| CoreError::InvalidField {
            field: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.id.is_empty() {
            return Err(invalid("missing id"));
        }
        if !FIELD_NAME_RE.is_match(&self.name) {
            return Err(invalid("name must contain only letters, digits and underscores"));
        }

        let reserved = base_model_field_names()
            .into_iter()
            .chain(system_field_names())
            .chain(auth_field_names());
        for name in reserved {
            if self.name.eq_ignore_ascii_case(name) {
                return Err(invalid("name is reserved"));
            }
        }

        self.options.validate(&self.name)
    }

    /// Normalize an arbitrary input into the field's storage representation
    pub fn prepare_value(&self, raw: Value) -> Value {
        match &self.options {
            FieldOptions::Text(_)
            | FieldOptions::Email(_)
            | FieldOptions::Url(_)
            | FieldOptions::Editor(_) => Value::String(scalar_to_string(&raw).unwrap_or_default()),
            FieldOptions::Number(_) => Value::Number(to_number(&raw)),
            FieldOptions::Bool(_) => Value::Bool(to_bool(&raw)),
            FieldOptions::Date(_) => {
                let text = scalar_to_string(&raw).unwrap_or_default();
                let normalized = DateTime::parse(&text)
                    .map(|dt| dt.to_string())
                    .unwrap_or_default();
                Value::String(normalized)
            }
            FieldOptions::Json(_) => match raw {
                Value::String(s) => {
                    serde_json::from_str::<Value>(&s).unwrap_or(Value::String(s))
                }
                other => other,
            },
            FieldOptions::Select(_) | FieldOptions::File(_) | FieldOptions::Relation(_) => {
                let items = to_unique_string_slice(&raw);
                if self.is_multiple() {
                    Value::Array(items.into_iter().map(Value::String).collect())
                } else {
                    // a single-valued field keeps the last submitted item
                    Value::String(items.into_iter().last().unwrap_or_default())
                }
            }
        }
    }
}

fn to_number(raw: &Value) -> Number {
    let value = match raw {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or_default(),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    };
    Number::from_f64(value).unwrap_or_else(|| Number::from(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::options::{RelationOptions, SelectOptions, TextOptions};
    use serde_json::json;

    fn relation(max: Option<usize>) -> SchemaField {
        SchemaField::new(
            "rel",
            FieldOptions::Relation(RelationOptions::new("target", max)),
        )
        .with_id("f1")
    }

    #[test]
    fn test_serde_round_trip_keeps_type_tag() {
        let raw = json!({
            "id": "abc",
            "name": "status",
            "type": "select",
            "required": true,
            "options": {"maxSelect": 1, "values": ["a", "b"]}
        });
        let field: SchemaField = serde_json::from_value(raw).unwrap();
        assert_eq!(field.field_type(), FieldType::Select);
        assert!(field.required);

        let encoded = serde_json::to_value(&field).unwrap();
        assert_eq!(encoded["type"], "select");
        assert_eq!(encoded["options"]["values"], json!(["a", "b"]));
    }

    #[test]
    fn test_deserialize_unknown_type_fails() {
        let raw = json!({"id": "a", "name": "x", "type": "geo"});
        assert!(serde_json::from_value::<SchemaField>(raw).is_err());
    }

    #[test]
    fn test_prepare_text() {
        let f = SchemaField::new("t", FieldOptions::Text(TextOptions::default()));
        assert_eq!(f.prepare_value(json!(12)), json!("12"));
        assert_eq!(f.prepare_value(Value::Null), json!(""));
    }

    #[test]
    fn test_prepare_number_and_bool() {
        let n = SchemaField::new("n", FieldOptions::Number(Default::default()));
        assert_eq!(n.prepare_value(json!("1.5")), json!(1.5));
        assert_eq!(n.prepare_value(json!("nope")), json!(0.0));

        let b = SchemaField::new("b", FieldOptions::Bool(Default::default()));
        assert_eq!(b.prepare_value(json!("true")), json!(true));
        assert_eq!(b.prepare_value(json!(0)), json!(false));
    }

    #[test]
    fn test_prepare_multi_relation() {
        let f = relation(None);
        assert_eq!(f.prepare_value(json!("[\"a\",\"b\",\"a\"]")), json!(["a", "b"]));
        assert_eq!(f.prepare_value(json!("a")), json!(["a"]));
        assert_eq!(f.prepare_value(Value::Null), json!([]));
    }

    #[test]
    fn test_prepare_single_relation() {
        let f = relation(Some(1));
        assert_eq!(f.prepare_value(json!(["a", "b"])), json!("b"));
        assert_eq!(f.prepare_value(Value::Null), json!(""));
    }

    #[test]
    fn test_prepare_json_decodes_strings() {
        let f = SchemaField::new("j", FieldOptions::Json(Default::default()));
        assert_eq!(f.prepare_value(json!("{\"a\":1}")), json!({"a": 1}));
        assert_eq!(f.prepare_value(json!("plain")), json!("plain"));
    }

    #[test]
    fn test_validate_reserved_name() {
        let f = SchemaField::new(
            "Created",
            FieldOptions::Select(SelectOptions {
                max_select: 1,
                values: vec!["x".into()],
            }),
        )
        .with_id("f1");
        assert!(f.validate().is_err());
    }
}
