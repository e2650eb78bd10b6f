//! Relation expansion
//!
//! Loads the records referenced by relation fields and attaches them to the
//! transient expand map of their parents, following dotted paths such as
//! `author.company`. Related records are obtained through a fetch callback so
//! callers can apply their own access checks.

use crate::dao::Dao;
use crate::error::{SqliteError, SqliteResult};
use cairn_core::utils::to_unique_string_slice;
use cairn_core::{Collection, Expanded, Record};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Maximum number of relation hops followed by one path
pub const MAX_EXPAND_DEPTH: usize = 6;

/// Loads the records of `collection` with the given ids
pub type ExpandFetchFn<'f> = dyn Fn(&Arc<Collection>, &[String]) -> SqliteResult<Vec<Record>> + 'f;

/// Trim, deduplicate and drop paths covered by a longer requested path
pub fn normalize_expands(paths: &[String]) -> Vec<String> {
    let cleaned: Vec<Value> = paths
        .iter()
        .map(|p| {
            let segments: Vec<&str> = p
                .split('.')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            Value::String(segments.join("."))
        })
        .collect();
    let unique = to_unique_string_slice(&Value::Array(cleaned));

    unique
        .iter()
        .filter(|p| {
            let prefix = format!("{}.", p);
            !unique.iter().any(|other| other.starts_with(&prefix))
        })
        .cloned()
        .collect()
}

impl<'c> Dao<'c> {
    /// Expand `paths` on `records` (which must share one collection).
    ///
    /// Returns the failures keyed by path; a failing path leaves the others
    /// untouched. Without a `fetch` callback related records are loaded by id.
    pub fn expand_records(
        &self,
        records: &mut [Record],
        paths: &[String],
        fetch: Option<&ExpandFetchFn<'_>>,
    ) -> HashMap<String, SqliteError> {
        let default_fetch = |collection: &Arc<Collection>, ids: &[String]| {
            self.find_records_by_ids(collection, ids)
        };
        let fetch: &ExpandFetchFn<'_> = match fetch {
            Some(fetch) => fetch,
            None => &default_fetch,
        };

        let mut failed = HashMap::new();
        for path in normalize_expands(paths) {
            if let Err(err) = self.expand_path(records, &path, fetch, 1) {
                debug!(path = %path, error = %err, "Expand failed");
                failed.insert(path, err);
            }
        }
        failed
    }

    fn expand_path(
        &self,
        records: &mut [Record],
        path: &str,
        fetch: &ExpandFetchFn<'_>,
        depth: usize,
    ) -> SqliteResult<()> {
        if path.is_empty() || depth > MAX_EXPAND_DEPTH || records.is_empty() {
            return Ok(());
        }

        let main_collection = Arc::clone(records[0].collection());
        let (name, rest) = match path.split_once('.') {
            Some((name, rest)) => (name, Some(rest)),
            None => (path, None),
        };

        let Some(options) = main_collection
            .schema
            .get_field_by_name(name)
            .and_then(|f| f.options.as_relation())
            .cloned()
        else {
            return Err(SqliteError::Resolve(format!(
                "couldn't find relation field {:?} in collection {:?}",
                name, main_collection.name
            )));
        };
        let related_collection = self.find_collection_by_name_or_id(&options.collection_id)?;

        let mut ids: Vec<String> = Vec::new();
        for record in records.iter() {
            for id in record.get_string_slice(name) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        if ids.is_empty() {
            return Ok(());
        }

        let mut related = fetch(&related_collection, &ids)?;

        if let Some(rest) = rest {
            self.expand_path(&mut related, rest, fetch, depth + 1)?;
        }

        let indexed: HashMap<String, &Record> = related
            .iter()
            .map(|r| (r.get_string("id"), r))
            .collect();

        for record in records.iter_mut() {
            let mut valid: Vec<Record> = record
                .get_string_slice(name)
                .iter()
                .filter_map(|id| indexed.get(id).map(|r| (*r).clone()))
                .collect();
            if valid.is_empty() {
                continue;
            }

            // keep nested expands attached by earlier calls
            if let Some(previous) = record.expand().get(name) {
                for old in previous.records() {
                    let old_id = old.get_string("id");
                    for rel in valid.iter_mut().filter(|r| r.get_string("id") == old_id) {
                        rel.merge_expand(old.expand().clone());
                    }
                }
            }

            let value = if options.max_select == Some(1) {
                Expanded::One(Box::new(valid.remove(0)))
            } else {
                Expanded::Many(valid)
            };
            record.expand_mut().insert(name.to_string(), value);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test_case(&["a.b.c", "a.b"], &["a.b.c"] ; "prefix dropped")]
    #[test_case(&[" a . b ", "a.b"], &["a.b"] ; "whitespace and duplicates")]
    #[test_case(&[".a..b.", ""], &["a.b"] ; "empty segments")]
    #[test_case(&["ab", "a.c"], &["ab", "a.c"] ; "prefix needs a dot boundary")]
    fn test_normalize_expands(input: &[&str], expected: &[&str]) {
        assert_eq!(normalize_expands(&paths(input)), paths(expected));
    }
}
