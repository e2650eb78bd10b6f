//! Record lookups, writes and reference cleanup

use super::{Dao, Row};
use crate::error::{SqliteError, SqliteResult};
use crate::resolver::RecordFieldResolver;
use crate::search::{build_filter, Expression, FieldResolver, Params, SelectQuery, SortField};
use cairn_core::utils::{columnify, subtract_slice};
use cairn_core::{Collection, Model, Record, SchemaField};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

impl<'c> Dao<'c> {
    /// Base select over a collection table, aliased by the collection name
    pub fn record_query(&self, collection: &Collection) -> SelectQuery {
        SelectQuery::new(collection.name.clone(), collection.name.clone())
    }

    pub fn find_record_by_id(&self, collection_name_or_id: &str, id: &str) -> SqliteResult<Record> {
        let collection = self.find_collection_by_name_or_id(collection_name_or_id)?;
        let mut query = self.record_query(&collection);
        query.and_where(Expression::with_params(
            format!("[[{}.id]] = {{:id}}", collection.name),
            Params::from([("id".to_string(), Value::String(id.to_string()))]),
        ));
        query.limit(1);

        self.fetch_records(&collection, &query)?
            .into_iter()
            .next()
            .ok_or_else(|| SqliteError::NotFound(format!("record {:?} in {:?}", id, collection.name)))
    }

    /// Records of `collection` with one of `ids`, in storage order
    pub fn find_records_by_ids(
        &self,
        collection: &Arc<Collection>,
        ids: &[String],
    ) -> SqliteResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut params = Params::new();
        let placeholders: Vec<String> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                params.insert(format!("id{}", i), Value::String(id.clone()));
                format!("{{:id{}}}", i)
            })
            .collect();

        let mut query = self.record_query(collection);
        query.and_where(Expression::with_params(
            format!("[[{}.id]] IN ({})", collection.name, placeholders.join(", ")),
            params,
        ));
        self.fetch_records(collection, &query)
    }

    /// First record whose `key` column equals `value`
    pub fn find_first_record_by_data(
        &self,
        collection_name_or_id: &str,
        key: &str,
        value: Value,
    ) -> SqliteResult<Record> {
        let collection = self.find_collection_by_name_or_id(collection_name_or_id)?;
        let mut query = self.record_query(&collection);
        query.and_where(Expression::with_params(
            format!("[[{}.{}]] = {{:value}}", collection.name, columnify(key)),
            Params::from([("value".to_string(), value)]),
        ));
        query.limit(1);

        self.fetch_records(&collection, &query)?
            .into_iter()
            .next()
            .ok_or_else(|| SqliteError::NotFound(format!("record with {} in {:?}", key, collection.name)))
    }

    /// Records matching a filter expression. Hidden auth fields are filterable.
    pub fn find_records_by_filter(
        &self,
        collection_name_or_id: &str,
        filter: &str,
        sort: &str,
        limit: usize,
        offset: usize,
    ) -> SqliteResult<Vec<Record>> {
        if filter.trim().is_empty() {
            return Err(SqliteError::Filter("missing filter expression".to_string()));
        }
        let collection = self.find_collection_by_name_or_id(collection_name_or_id)?;
        let mut resolver = RecordFieldResolver::new(self, Arc::clone(&collection), None, true)
            .with_dialect(self.dialect());
        self.find_records_with_resolver(&collection, &mut resolver, filter, sort, limit, offset)
    }

    /// Records matching `filter` ordered by `sort`, both compiled through `resolver`
    pub fn find_records_with_resolver(
        &self,
        collection: &Arc<Collection>,
        resolver: &mut dyn FieldResolver,
        filter: &str,
        sort: &str,
        limit: usize,
        offset: usize,
    ) -> SqliteResult<Vec<Record>> {
        let mut query = self.record_query(collection);

        if !filter.trim().is_empty() {
            query.and_where(build_filter(filter, resolver)?);
        }
        for field in SortField::parse_list(sort) {
            query.order_by(field.build(resolver)?);
        }
        resolver.update_query(&mut query);
        query.limit(limit);
        query.offset(offset);

        self.fetch_records(collection, &query)
    }

    fn fetch_records(&self, collection: &Arc<Collection>, query: &SelectQuery) -> SqliteResult<Vec<Record>> {
        let (sql, params) = query.build(self.dialect());
        let rows: Vec<Row> =
            self.query_rows_with_timeout(&sql, &params, self.config.model_query_timeout())?;
        Ok(rows
            .iter()
            .map(|row| Record::from_row(Arc::clone(collection), row))
            .collect())
    }

    pub fn save_record(&self, record: &mut Record) -> SqliteResult<()> {
        if record.collection().is_view() {
            return Err(SqliteError::InvalidOperation(format!(
                "records of view collection {:?} are read only",
                record.collection().name
            )));
        }
        self.save(record)
    }

    /// Delete a record and clean up every relation pointing at it.
    ///
    /// Referencing records either lose the id, get deleted themselves
    /// (cascade delete with no ids left), or abort the whole operation when a
    /// required relation would end up empty.
    pub fn delete_record(&self, record: &Record) -> SqliteResult<()> {
        if record.collection().is_view() {
            return Err(SqliteError::InvalidOperation(format!(
                "records of view collection {:?} are read only",
                record.collection().name
            )));
        }

        self.run_in_transaction(|tx| {
            let references = tx.find_collection_references(record.collection(), &[])?;

            // the row goes first so that mutual references cannot recurse forever
            let mut model = record.clone();
            tx.delete(&mut model)?;

            tx.cascade_record_delete(record, &references)
        })
    }

    fn cascade_record_delete(
        &self,
        main: &Record,
        references: &[(Collection, Vec<SchemaField>)],
    ) -> SqliteResult<()> {
        let main_id = main.id().to_string();

        for (ref_collection, fields) in references {
            if ref_collection.is_view() {
                continue;
            }
            let ref_collection = Arc::new(ref_collection.clone());

            for field in fields {
                let Some(options) = field.options.as_relation() else {
                    continue;
                };

                for mut ref_record in self.find_referencing_records(&ref_collection, field, &main_id)? {
                    let remaining = subtract_slice(
                        &ref_record.get_string_slice(&field.name),
                        std::slice::from_ref(&main_id),
                    );

                    if remaining.is_empty() && options.cascade_delete {
                        debug!(
                            collection = %ref_collection.name,
                            id = %ref_record.id(),
                            "Cascade deleting referencing record"
                        );
                        self.delete_record(&ref_record)?;
                        continue;
                    }

                    if remaining.is_empty() && field.required {
                        return Err(SqliteError::InvalidOperation(format!(
                            "record {:?} of {:?} requires at least one {:?} relation",
                            ref_record.id(),
                            ref_collection.name,
                            field.name
                        )));
                    }

                    ref_record.set(
                        &field.name,
                        Value::Array(remaining.into_iter().map(Value::String).collect()),
                    );
                    self.save_record(&mut ref_record)?;
                }
            }
        }

        Ok(())
    }

    fn find_referencing_records(
        &self,
        collection: &Arc<Collection>,
        field: &SchemaField,
        id: &str,
    ) -> SqliteResult<Vec<Record>> {
        let column = format!("[[{}.{}]]", collection.name, field.name);
        let condition = if field.is_multiple() {
            format!(
                "EXISTS (SELECT 1 FROM {} [[__je]] WHERE [[__je.value]] = {{:id}})",
                self.dialect().json_each(&column)
            )
        } else {
            format!("{} = {{:id}}", column)
        };

        let mut query = self.record_query(collection);
        query.and_where(Expression::with_params(
            condition,
            Params::from([("id".to_string(), Value::String(id.to_string()))]),
        ));
        self.fetch_records(collection, &query)
    }
}
