//! Collection lookups and collection-level DDL

use super::Dao;
use crate::error::{SqliteError, SqliteResult};
use crate::search::Params;
use cairn_core::{Collection, CollectionOptions, SchemaField};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

impl<'c> Dao<'c> {
    /// Collection by id or case-insensitive name
    pub fn find_collection_by_name_or_id(&self, name_or_id: &str) -> SqliteResult<Arc<Collection>> {
        let params = Params::from([("v".to_string(), Value::String(name_or_id.to_string()))]);
        let sql = format!(
            "SELECT * FROM {{{{_collections}}}} WHERE [[id]] = {{:v}} OR [[name]] = {{:v}} {} LIMIT 1",
            self.dialect().nocase()
        );
        let rows = self.query_rows_with_timeout(
            &sql,
            &params,
            self.config.model_query_timeout(),
        )?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| SqliteError::NotFound(format!("collection {:?}", name_or_id)))?;
        Ok(Arc::new(Collection::from_row(&row)?))
    }

    /// Every collection in creation order
    pub fn find_collections(&self) -> SqliteResult<Vec<Collection>> {
        let rows = self.query_rows_with_timeout(
            "SELECT * FROM {{_collections}} ORDER BY rowid",
            &Params::new(),
            self.config.model_query_timeout(),
        )?;
        rows.iter()
            .map(|row| Collection::from_row(row).map_err(SqliteError::from))
            .collect()
    }

    /// Relation fields of other collections pointing at `collection`.
    ///
    /// Collections whose id is in `exclude_ids` are skipped.
    pub fn find_collection_references(
        &self,
        collection: &Collection,
        exclude_ids: &[&str],
    ) -> SqliteResult<Vec<(Collection, Vec<SchemaField>)>> {
        let mut result = Vec::new();
        for candidate in self.find_collections()? {
            if exclude_ids.contains(&candidate.base.id.as_str()) {
                continue;
            }
            let fields: Vec<SchemaField> = candidate
                .schema
                .fields()
                .iter()
                .filter(|f| {
                    f.options
                        .as_relation()
                        .is_some_and(|r| r.collection_id == collection.base.id)
                })
                .cloned()
                .collect();
            if !fields.is_empty() {
                result.push((candidate, fields));
            }
        }
        Ok(result)
    }

    /// Validate and persist a collection, then bring its table or view in line
    pub fn save_collection(&self, collection: &mut Collection) -> SqliteResult<()> {
        collection.validate()?;

        let old = if collection.base.is_new() {
            None
        } else {
            let old = self.find_collection_by_name_or_id(&collection.base.id)?;
            if old.collection_type() != collection.collection_type() {
                return Err(SqliteError::InvalidOperation(format!(
                    "collection {:?} cannot change its type",
                    old.name
                )));
            }
            Some(old)
        };

        if !collection.base.has_id() {
            collection.base.refresh_id();
        }

        self.run_in_transaction(|tx| {
            tx.save(&mut *collection)?;

            match &collection.options {
                CollectionOptions::View(view) => {
                    if let Some(old) = &old {
                        tx.delete_view(&old.name)?;
                    }
                    tx.save_view(&collection.name, &view.query)
                }
                _ => tx.sync_record_table_schema(collection, old.as_deref()),
            }
        })?;

        info!(collection = %collection.name, "Collection saved");
        Ok(())
    }

    /// Delete a collection together with its table or view.
    ///
    /// System collections and collections still referenced by other
    /// collections' relation fields are refused.
    pub fn delete_collection(&self, collection: &Collection) -> SqliteResult<()> {
        if collection.system {
            return Err(SqliteError::InvalidOperation(format!(
                "system collection {:?} cannot be deleted",
                collection.name
            )));
        }

        let references = self.find_collection_references(collection, &[&collection.base.id])?;
        if !references.is_empty() {
            let names: Vec<&str> = references.iter().map(|(c, _)| c.name.as_str()).collect();
            return Err(SqliteError::InvalidOperation(format!(
                "collection {:?} is referenced by {}",
                collection.name,
                names.join(", ")
            )));
        }

        self.run_in_transaction(|tx| {
            let mut model = collection.clone();
            tx.delete(&mut model)?;
            if collection.is_view() {
                tx.delete_view(&collection.name)
            } else {
                tx.execute_ddl(&format!("DROP TABLE IF EXISTS {{{{{}}}}}", collection.name))
            }
        })?;

        info!(collection = %collection.name, "Collection deleted");
        Ok(())
    }

    /// Create or replace a SQL view
    pub fn save_view(&self, name: &str, select_query: &str) -> SqliteResult<()> {
        self.run_in_transaction(|tx| {
            tx.delete_view(name)?;
            let query = select_query.trim().trim_end_matches(';');
            tx.execute_ddl(&format!("CREATE VIEW {{{{{}}}}} AS {}", name, query))
        })
    }

    pub fn delete_view(&self, name: &str) -> SqliteResult<()> {
        self.execute_ddl(&format!("DROP VIEW IF EXISTS {{{{{}}}}}", name))
    }

    /// Execute a schema statement under the model query timeout
    pub(crate) fn execute_ddl(&self, sql: &str) -> SqliteResult<()> {
        debug!(sql = %sql, "Executing DDL");
        self.execute_with_timeout(sql, &Params::new(), self.config.model_query_timeout())?;
        Ok(())
    }
}
