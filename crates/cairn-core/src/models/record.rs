//! Record: one row of a collection

use super::{BaseModel, Collection, Model};
use crate::schema::{
    auth_field_names, FieldOptions, FIELD_NAME_COLLECTION_ID, FIELD_NAME_COLLECTION_NAME,
    FIELD_NAME_CREATED, FIELD_NAME_EMAIL, FIELD_NAME_EMAIL_VISIBILITY, FIELD_NAME_EXPAND,
    FIELD_NAME_ID, FIELD_NAME_TOKEN_KEY, FIELD_NAME_UPDATED, FIELD_NAME_USERNAME,
    FIELD_NAME_VERIFIED,
};
use crate::types::DateTime;
use crate::utils::{random_string, scalar_to_string, to_bool, to_unique_string_slice};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Related records attached to a parent under one relation field
#[derive(Debug, Clone)]
pub enum Expanded {
    One(Box<Record>),
    Many(Vec<Record>),
}

impl Expanded {
    pub fn records(&self) -> &[Record] {
        match self {
            Expanded::One(record) => std::slice::from_ref(&**record),
            Expanded::Many(records) => records,
        }
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        match self {
            Expanded::One(record) => std::slice::from_mut(&mut **record),
            Expanded::Many(records) => records,
        }
    }

    fn export(&self) -> Value {
        match self {
            Expanded::One(record) => Value::Object(record.public_export()),
            Expanded::Many(records) => Value::Array(
                records
                    .iter()
                    .map(|r| Value::Object(r.public_export()))
                    .collect(),
            ),
        }
    }
}

/// Expand map keyed by relation field name
pub type ExpandMap = BTreeMap<String, Expanded>;

/// One row of a [`Collection`].
///
/// Field values only enter through [`Record::set`], which routes every
/// schema field through [`SchemaField::prepare_value`](crate::schema::SchemaField::prepare_value).
/// The expand map is transient and never persisted.
#[derive(Debug, Clone)]
pub struct Record {
    base: BaseModel,
    collection: Arc<Collection>,
    data: Map<String, Value>,
    expand: ExpandMap,
    ignore_email_visibility: bool,
}

impl Record {
    /// Empty record of `collection`
    pub fn new(collection: Arc<Collection>) -> Self {
        let mut record = Self {
            base: BaseModel::default(),
            collection,
            data: Map::new(),
            expand: ExpandMap::new(),
            ignore_email_visibility: false,
        };

        if record.collection.is_auth() {
            record.set(FIELD_NAME_TOKEN_KEY, Value::String(random_string(50)));
            record.set(
                FIELD_NAME_USERNAME,
                Value::String(format!("user{}", random_string(8))),
            );
        }

        record
    }

    /// Record loaded from a raw row of the collection table
    pub fn from_row(collection: Arc<Collection>, row: &Map<String, Value>) -> Self {
        let mut record = Self::new(collection);
        record.load(row);
        record.base.mark_as_not_new();
        record
    }

    /// Set every key of `data`
    pub fn load(&mut self, data: &Map<String, Value>) {
        for (key, value) in data {
            self.set(key, value.clone());
        }
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    /// Set a single value, normalising it for its column
    pub fn set(&mut self, key: &str, value: Value) {
        match key {
            FIELD_NAME_ID => self.base.id = scalar_to_string(&value).unwrap_or_default(),
            FIELD_NAME_CREATED => {
                self.base.created = parse_datetime(&value);
            }
            FIELD_NAME_UPDATED => {
                self.base.updated = parse_datetime(&value);
            }
            FIELD_NAME_COLLECTION_ID | FIELD_NAME_COLLECTION_NAME | FIELD_NAME_EXPAND => {}
            _ => {
                let normalized = if let Some(field) = self.collection.schema.get_field_by_name(key)
                {
                    field.prepare_value(value)
                } else if self.collection.is_auth() && auth_field_names().contains(&key) {
                    normalize_auth_value(key, value)
                } else {
                    value
                };
                self.data.insert(key.to_string(), normalized);
            }
        }
    }

    /// Value of `key`, including the virtual collection keys
    pub fn get(&self, key: &str) -> Value {
        match key {
            FIELD_NAME_ID => Value::String(self.base.id.clone()),
            FIELD_NAME_CREATED => Value::String(self.base.created.to_string()),
            FIELD_NAME_UPDATED => Value::String(self.base.updated.to_string()),
            FIELD_NAME_COLLECTION_ID => Value::String(self.collection.base.id.clone()),
            FIELD_NAME_COLLECTION_NAME => Value::String(self.collection.name.clone()),
            _ => match self.data.get(key) {
                Some(value) => value.clone(),
                None => self.default_value(key),
            },
        }
    }

    pub fn get_string(&self, key: &str) -> String {
        match self.get(key) {
            Value::Array(_) | Value::Object(_) => String::new(),
            other => scalar_to_string(&other).unwrap_or_default(),
        }
    }

    pub fn get_bool(&self, key: &str) -> bool {
        to_bool(&self.get(key))
    }

    pub fn get_f64(&self, key: &str) -> f64 {
        match self.get(key) {
            Value::Number(n) => n.as_f64().unwrap_or_default(),
            Value::String(s) => s.parse().unwrap_or_default(),
            _ => 0.0,
        }
    }

    /// Value of `key` as a list of unique, non-empty strings
    pub fn get_string_slice(&self, key: &str) -> Vec<String> {
        to_unique_string_slice(&self.get(key))
    }

    /// Export the email of auth records even when `emailVisibility` is off
    pub fn ignore_email_visibility(&mut self, ignore: bool) {
        self.ignore_email_visibility = ignore;
    }

    pub fn expand(&self) -> &ExpandMap {
        &self.expand
    }

    pub fn expand_mut(&mut self) -> &mut ExpandMap {
        &mut self.expand
    }

    pub fn set_expand(&mut self, expand: ExpandMap) {
        self.expand = expand;
    }

    /// Merge `incoming` into the current expand map.
    ///
    /// Related records present on both sides (matched by id) have their own
    /// nested expands merged recursively; unmatched incoming records are
    /// appended. Keys missing on this side are inserted as-is.
    pub fn merge_expand(&mut self, incoming: ExpandMap) {
        for (key, new_value) in incoming {
            let Some(old_value) = self.expand.remove(&key) else {
                self.expand.insert(key, new_value);
                continue;
            };

            let was_many = matches!(old_value, Expanded::Many(_))
                || matches!(new_value, Expanded::Many(_));

            let mut merged: Vec<Record> = match old_value {
                Expanded::One(record) => vec![*record],
                Expanded::Many(records) => records,
            };

            let new_records = match new_value {
                Expanded::One(record) => vec![*record],
                Expanded::Many(records) => records,
            };

            for new_record in new_records {
                match merged.iter_mut().find(|r| r.base.id == new_record.base.id) {
                    Some(existing) => existing.merge_expand(new_record.expand),
                    None => merged.push(new_record),
                }
            }

            let value = if was_many || merged.len() != 1 {
                Expanded::Many(merged)
            } else {
                Expanded::One(Box::new(merged.remove(0)))
            };
            self.expand.insert(key, value);
        }
    }

    /// Client-facing representation (hidden auth columns omitted)
    pub fn public_export(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for key in [
            FIELD_NAME_ID,
            FIELD_NAME_COLLECTION_ID,
            FIELD_NAME_COLLECTION_NAME,
            FIELD_NAME_CREATED,
            FIELD_NAME_UPDATED,
        ] {
            out.insert(key.to_string(), self.get(key));
        }

        if self.collection.is_auth() {
            for key in [
                FIELD_NAME_USERNAME,
                FIELD_NAME_VERIFIED,
                FIELD_NAME_EMAIL_VISIBILITY,
            ] {
                out.insert(key.to_string(), self.get(key));
            }
            if self.ignore_email_visibility || self.get_bool(FIELD_NAME_EMAIL_VISIBILITY) {
                out.insert(FIELD_NAME_EMAIL.to_string(), self.get(FIELD_NAME_EMAIL));
            }
        }

        for field in self.collection.schema.fields() {
            out.insert(field.name.clone(), self.get(&field.name));
        }

        if !self.expand.is_empty() {
            let expand = self
                .expand
                .iter()
                .map(|(k, v)| (k.clone(), v.export()))
                .collect();
            out.insert(FIELD_NAME_EXPAND.to_string(), Value::Object(expand));
        }

        out
    }

    /// Column values in storage form (JSON fields and lists encoded as text by the driver)
    fn storage_map(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert(FIELD_NAME_ID.to_string(), Value::String(self.base.id.clone()));
        out.insert(
            FIELD_NAME_CREATED.to_string(),
            Value::String(self.base.created.to_string()),
        );
        out.insert(
            FIELD_NAME_UPDATED.to_string(),
            Value::String(self.base.updated.to_string()),
        );

        if self.collection.is_auth() {
            for key in auth_field_names() {
                out.insert(key.to_string(), self.get(key));
            }
        }

        for field in self.collection.schema.fields() {
            let value = self.get(&field.name);
            let value = match (&field.options, value) {
                (FieldOptions::Json(_), Value::Null) => Value::Null,
                (FieldOptions::Json(_), other) => Value::String(other.to_string()),
                (_, other) => other,
            };
            out.insert(field.name.clone(), value);
        }

        out
    }

    fn default_value(&self, key: &str) -> Value {
        if let Some(field) = self.collection.schema.get_field_by_name(key) {
            return field.prepare_value(Value::Null);
        }
        if self.collection.is_auth() && auth_field_names().contains(&key) {
            return normalize_auth_value(key, Value::Null);
        }
        Value::Null
    }
}

fn parse_datetime(value: &Value) -> DateTime {
    scalar_to_string(value)
        .and_then(|s| DateTime::parse(&s).ok())
        .unwrap_or_default()
}

fn normalize_auth_value(key: &str, value: Value) -> Value {
    match key {
        FIELD_NAME_EMAIL_VISIBILITY | FIELD_NAME_VERIFIED => Value::Bool(to_bool(&value)),
        _ => Value::String(scalar_to_string(&value).unwrap_or_default()),
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.public_export())
    }
}

impl Model for Record {
    fn table_name(&self) -> String {
        self.collection.name.clone()
    }

    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }

    fn column_value_map(&self) -> Option<Map<String, Value>> {
        Some(self.storage_map())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
