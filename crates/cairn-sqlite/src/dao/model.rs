//! Generic model persistence

use super::Dao;
use crate::error::{SqliteError, SqliteResult};
use crate::search::Params;
use cairn_core::Model;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

impl<'c> Dao<'c> {
    /// Insert a new model or update an existing one (lock retried)
    pub fn save<M>(&self, model: &mut M) -> SqliteResult<()>
    where
        M: Model + Serialize + Clone,
    {
        if model.is_new() {
            self.lock_retry(|dao| dao.create(model))
        } else {
            self.lock_retry(|dao| dao.update(model))
        }
    }

    /// Delete a persisted model (lock retried)
    pub fn delete<M>(&self, model: &mut M) -> SqliteResult<()>
    where
        M: Model + Serialize + Clone,
    {
        if !model.base().has_id() {
            return Err(SqliteError::MissingId);
        }
        self.lock_retry(|dao| dao.delete_model(model))
    }

    fn create<M>(&self, model: &mut M) -> SqliteResult<()>
    where
        M: Model + Serialize + Clone,
    {
        if !model.base().has_id() {
            model.base_mut().refresh_id();
        }
        if model.base().created.is_zero() {
            model.base_mut().refresh_created();
        }
        if model.base().updated.is_zero() {
            model.base_mut().refresh_updated();
        }

        if let Some(hook) = &self.hooks.before_create {
            hook(self, &mut *model)?;
        }

        let table = model.table_name();
        let columns = column_values(model)?;
        let names: Vec<&String> = columns.keys().collect();
        let sql = format!(
            "INSERT INTO {{{{{}}}}} ({}) VALUES ({})",
            table,
            names
                .iter()
                .map(|c| format!("[[{}]]", c))
                .collect::<Vec<_>>()
                .join(", "),
            names
                .iter()
                .map(|c| format!("{{:{}}}", c))
                .collect::<Vec<_>>()
                .join(", "),
        );
        let params: Params = columns.clone().into_iter().collect();
        self.execute_with_timeout(&sql, &params, self.config.model_query_timeout())?;

        model.base_mut().mark_as_not_new();
        debug!(table = %table, id = %model.id(), "Model created");

        if let Some(hook) = self.hooks.after_create.clone() {
            let snapshot = model.clone();
            self.after(Box::new(move |dao: &Dao<'_>| hook(dao, &snapshot)))?;
        }
        Ok(())
    }

    fn update<M>(&self, model: &mut M) -> SqliteResult<()>
    where
        M: Model + Serialize + Clone,
    {
        if !model.base().has_id() {
            return Err(SqliteError::MissingId);
        }
        model.base_mut().refresh_updated();

        if let Some(hook) = &self.hooks.before_update {
            hook(self, &mut *model)?;
        }

        let table = model.table_name();
        let columns = column_values(model)?;
        let assignments: Vec<String> = columns
            .keys()
            .filter(|c| c.as_str() != "id")
            .map(|c| format!("[[{c}]] = {{:{c}}}"))
            .collect();
        let sql = format!(
            "UPDATE {{{{{}}}}} SET {} WHERE [[id]] = {{:__model_id}}",
            table,
            assignments.join(", ")
        );
        let mut params: Params = columns.into_iter().collect();
        params.insert("__model_id".to_string(), Value::String(model.id().to_string()));
        self.execute_with_timeout(&sql, &params, self.config.model_query_timeout())?;

        debug!(table = %table, id = %model.id(), "Model updated");

        if let Some(hook) = self.hooks.after_update.clone() {
            let snapshot = model.clone();
            self.after(Box::new(move |dao: &Dao<'_>| hook(dao, &snapshot)))?;
        }
        Ok(())
    }

    fn delete_model<M>(&self, model: &mut M) -> SqliteResult<()>
    where
        M: Model + Serialize + Clone,
    {
        if let Some(hook) = &self.hooks.before_delete {
            hook(self, &mut *model)?;
        }

        let table = model.table_name();
        let params = Params::from([("id".to_string(), Value::String(model.id().to_string()))]);
        self.execute_with_timeout(
            &format!("DELETE FROM {{{{{}}}}} WHERE [[id]] = {{:id}}", table),
            &params,
            self.config.model_query_timeout(),
        )?;

        debug!(table = %table, id = %model.id(), "Model deleted");

        if let Some(hook) = self.hooks.after_delete.clone() {
            let snapshot = model.clone();
            self.after(Box::new(move |dao: &Dao<'_>| hook(dao, &snapshot)))?;
        }
        Ok(())
    }
}

/// Column values of a model: its own map, or the fields of its serde object
fn column_values<M: Model + Serialize>(model: &M) -> SqliteResult<Map<String, Value>> {
    if let Some(map) = model.column_value_map() {
        return Ok(map);
    }
    match serde_json::to_value(model)? {
        Value::Object(map) => Ok(map),
        other => Err(SqliteError::InvalidOperation(format!(
            "model of table {:?} does not serialize to an object: {}",
            model.table_name(),
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SqlitePool;
    use crate::dao::Hooks;
    use cairn_core::Collection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn dao() -> Dao<'static> {
        Dao::new(SqlitePool::memory().expect("Failed to create pool"))
    }

    fn count_collections(dao: &Dao<'_>) -> usize {
        dao.query_rows("SELECT * FROM {{_collections}}", &Params::new())
            .expect("Failed to query")
            .len()
    }

    #[test]
    fn test_create_assigns_id_and_timestamps() {
        let dao = dao();
        let mut collection = Collection::new_base("posts");
        dao.save(&mut collection).expect("Failed to save");

        assert!(collection.base.has_id());
        assert!(!collection.base.is_new());
        assert!(!collection.base.created.is_zero());
        assert_eq!(count_collections(&dao), 1);
    }

    #[test]
    fn test_update_persists_changes() {
        let dao = dao();
        let mut collection = Collection::new_base("posts");
        dao.save(&mut collection).expect("Failed to save");

        collection.name = "articles".to_string();
        dao.save(&mut collection).expect("Failed to update");

        let rows = dao
            .query_rows("SELECT [[name]] FROM {{_collections}}", &Params::new())
            .expect("Failed to query");
        assert_eq!(rows[0]["name"], "articles");
    }

    #[test]
    fn test_update_without_id_fails() {
        let dao = dao();
        let mut collection = Collection::new_base("posts");
        collection.base.mark_as_not_new();
        let result = dao.save(&mut collection);
        assert!(matches!(result, Err(SqliteError::MissingId)));
    }

    #[test]
    fn test_before_hook_can_veto() {
        let dao = dao().with_hooks(Hooks::new().on_before_create(|_, _| {
            Err(SqliteError::InvalidOperation("nope".to_string()))
        }));
        let mut collection = Collection::new_base("posts");
        assert!(dao.save(&mut collection).is_err());
        assert_eq!(count_collections(&dao), 0);
    }

    #[test]
    fn test_after_hooks_wait_for_commit() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let dao = dao().with_hooks(Hooks::new().on_after_create(move |_, model| {
            assert!(model.as_any().downcast_ref::<Collection>().is_some());
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let observed = Arc::clone(&fired);
        dao.run_in_transaction(|tx| {
            let mut collection = Collection::new_base("posts");
            tx.save(&mut collection)?;
            assert_eq!(observed.load(Ordering::SeqCst), 0);
            Ok(())
        })
        .expect("Transaction failed");

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_after_hooks_dropped_on_rollback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let dao = dao().with_hooks(Hooks::new().on_after_create(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let result: SqliteResult<()> = dao.run_in_transaction(|tx| {
            let mut collection = Collection::new_base("posts");
            tx.save(&mut collection)?;
            Err(SqliteError::InvalidOperation("rollback".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(count_collections(&dao), 0);
    }

    #[test]
    fn test_delete_requires_id() {
        let dao = dao();
        let mut collection = Collection::new_base("posts");
        assert!(matches!(dao.delete(&mut collection), Err(SqliteError::MissingId)));
    }

    #[test]
    fn test_delete_removes_row() {
        let dao = dao();
        let mut collection = Collection::new_base("posts");
        dao.save(&mut collection).expect("Failed to save");
        dao.delete(&mut collection).expect("Failed to delete");
        assert_eq!(count_collections(&dao), 0);
    }
}
