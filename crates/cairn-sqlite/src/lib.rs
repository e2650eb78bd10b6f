//! SQLite storage for cairn collections
//!
//! This crate turns the logical collection model of `cairn-core` into SQL:
//!
//! - **Dao**: transactional create/update/delete with lifecycle hooks and
//!   lock-contention retry, plus collection and record lookups
//! - **Table sync**: keeps each record table in line with its collection schema
//! - **Expansion**: attaches related records along dotted relation paths
//! - **Filters**: compiles filter/sort expressions through a field resolver,
//!   including relation joins and multi-match subqueries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cairn_sqlite::{Dao, SqliteConfig, SqlitePool};
//!
//! let dao = Dao::new(SqlitePool::new(SqliteConfig::new("./cairn.db"))?);
//! let posts = dao.find_records_by_filter("posts", "author.name = 'ada'", "-created", 20, 0)?;
//! ```

pub mod config;
pub mod connection;
pub mod dao;
pub mod dialect;
pub mod error;
pub mod expand;
pub mod resolver;
pub mod schema;
pub mod search;
pub mod sync;

// Re-exports
pub use config::SqliteConfig;
pub use connection::SqlitePool;
pub use dao::{AfterHook, BeforeHook, Dao, Hooks, Row};
pub use dialect::Dialect;
pub use error::{SqliteError, SqliteResult};
pub use expand::{normalize_expands, ExpandFetchFn, MAX_EXPAND_DEPTH};
pub use resolver::{CollectionLookup, RecordFieldResolver, RequestInfo};
pub use search::{build_filter, FieldResolver, SelectQuery, SimpleFieldResolver, SortField};
