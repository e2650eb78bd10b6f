//! Collection, schema and record model for cairn
//!
//! This crate holds the storage-independent half of the system: logical
//! collections with their typed fields, records with value normalisation,
//! and the small helpers the SQL layer shares with it.
//!
//! ## Usage
//!
//! ```rust
//! use cairn_core::{Collection, FieldOptions, Record, Schema, SchemaField, TextOptions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let posts = Collection::new_base("posts").with_schema(Schema::new([SchemaField::new(
//!     "title",
//!     FieldOptions::Text(TextOptions::default()),
//! )]));
//!
//! let mut record = Record::new(Arc::new(posts));
//! record.set("title", json!(42));
//! assert_eq!(record.get_string("title"), "42");
//! ```

pub mod error;
pub mod index;
pub mod models;
pub mod schema;
pub mod types;
pub mod utils;

pub use error::{CoreError, CoreResult};
pub use index::{IndexColumn, ParsedIndex};
pub use models::{
    AuthOptions, BaseModel, BaseOptions, Collection, CollectionOptions, CollectionType, ExpandMap,
    Expanded, Model, Record, ViewOptions, COLLECTIONS_TABLE, DEFAULT_ID_LENGTH,
};
pub use schema::*;
pub use types::DateTime;
