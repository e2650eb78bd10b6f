//! Persisted models
//!
//! Everything the persistence layer writes implements [`Model`]. A model
//! either supplies its own column/value map or is mapped generically from
//! its serde representation.

mod collection;
mod record;

pub use collection::*;
pub use record::*;

use crate::types::DateTime;
use crate::utils::random_string;
use serde_json::{Map, Value};
use std::any::Any;

/// Length of generated model ids
pub const DEFAULT_ID_LENGTH: usize = 15;

/// Identity and timestamps shared by every model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseModel {
    pub id: String,
    pub created: DateTime,
    pub updated: DateTime,
    not_new: bool,
}

impl BaseModel {
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// A model is new until it has been loaded from or written to storage
    pub fn is_new(&self) -> bool {
        !self.not_new
    }

    pub fn mark_as_new(&mut self) {
        self.not_new = false;
    }

    pub fn mark_as_not_new(&mut self) {
        self.not_new = true;
    }

    pub fn refresh_id(&mut self) {
        self.id = random_string(DEFAULT_ID_LENGTH);
    }

    pub fn refresh_created(&mut self) {
        self.created = DateTime::now();
    }

    pub fn refresh_updated(&mut self) {
        self.updated = DateTime::now();
    }
}

/// A row-backed entity.
///
/// Object safe so lifecycle hooks can receive `&dyn Model` and downcast
/// through [`Model::as_any`].
pub trait Model: Send + Sync + 'static {
    /// Table the model is stored in
    fn table_name(&self) -> String;

    fn base(&self) -> &BaseModel;

    fn base_mut(&mut self) -> &mut BaseModel;

    /// Custom column/value map. `None` selects generic serde-based mapping.
    fn column_value_map(&self) -> Option<Map<String, Value>> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn id(&self) -> &str {
        &self.base().id
    }

    fn is_new(&self) -> bool {
        self.base().is_new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_model_lifecycle() {
        let mut m = BaseModel::default();
        assert!(m.is_new());
        assert!(!m.has_id());

        m.refresh_id();
        assert_eq!(m.id.len(), DEFAULT_ID_LENGTH);

        m.mark_as_not_new();
        assert!(!m.is_new());
        m.mark_as_new();
        assert!(m.is_new());
    }

    #[test]
    fn test_refresh_timestamps() {
        let mut m = BaseModel::default();
        m.refresh_created();
        m.refresh_updated();
        assert!(!m.created.is_zero());
        assert!(!m.updated.is_zero());
    }
}
