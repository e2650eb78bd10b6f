//! Collection schema: an ordered list of typed fields

mod field;
mod options;

pub use field::*;
pub use options::*;

use crate::error::{CoreError, CoreResult};
use crate::utils::random_string;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered field list of a collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: Vec<SchemaField>,
}

impl Schema {
    /// Build a schema, assigning ids to fields that have none
    pub fn new(fields: impl IntoIterator<Item = SchemaField>) -> Self {
        let mut schema = Self::default();
        for field in fields {
            schema.add_field(field);
        }
        schema
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [SchemaField] {
        &mut self.fields
    }

    pub fn get_field_by_id(&self, id: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn get_field_by_id_mut(&mut self, id: &str) -> Option<&mut SchemaField> {
        self.fields.iter_mut().find(|f| f.id == id)
    }

    pub fn get_field_by_name(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn get_field_by_name_mut(&mut self, name: &str) -> Option<&mut SchemaField> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Insert a field, replacing an existing one with the same id
    pub fn add_field(&mut self, mut field: SchemaField) {
        if field.id.is_empty() {
            field.id = random_string(8);
        }

        match self.fields.iter_mut().find(|f| f.id == field.id) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// Remove a field by id
    pub fn remove_field(&mut self, id: &str) {
        self.fields.retain(|f| f.id != id);
    }

    /// Field names and ids must be unique (names case-insensitively)
    pub fn validate(&self) -> CoreResult<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();

        for field in &self.fields {
            field.validate()?;

            if !ids.insert(field.id.clone()) {
                return Err(CoreError::DuplicateField(field.id.clone()));
            }
            if !names.insert(field.name.to_lowercase()) {
                return Err(CoreError::DuplicateField(field.name.clone()));
            }
        }

        Ok(())
    }
}
