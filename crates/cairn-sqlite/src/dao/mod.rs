//! Data access object
//!
//! [`Dao`] is the single entry point for reads and writes. It is either bound
//! to the pool or to an open transaction; the transaction-bound flavour is
//! only ever handed out by [`Dao::run_in_transaction`] and cannot outlive it.

mod collection;
mod hooks;
mod model;
mod record;
mod retry;

pub use hooks::{AfterHook, BeforeHook, Hooks};

use crate::config::SqliteConfig;
use crate::connection::SqlitePool;
use crate::dialect::Dialect;
use crate::error::{SqliteError, SqliteResult};
use crate::search::Params;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode, Statement, TransactionBehavior};
use serde_json::{Map, Number, Value};
use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Row decoded into column name -> JSON value
pub type Row = Map<String, Value>;

/// After-hook invocation deferred until the enclosing transaction commits
type QueuedHook = Box<dyn FnOnce(&Dao<'_>) -> SqliteResult<()>>;

#[derive(Clone)]
enum Db<'c> {
    Pool(SqlitePool),
    Tx(&'c Connection),
}

#[derive(Clone)]
pub struct Dao<'c> {
    db: Db<'c>,
    config: Arc<SqliteConfig>,
    hooks: Hooks,
    after_queue: Option<&'c RefCell<Vec<QueuedHook>>>,
}

impl Dao<'static> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            config: pool.shared_config(),
            db: Db::Pool(pool),
            hooks: Hooks::default(),
            after_queue: None,
        }
    }
}

impl<'c> Dao<'c> {
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Flavour statements are rendered in before execution. The connection is
    /// always SQLite; Postgres SQL is only produced through [`Dialect::render_with_params`].
    pub fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self.db, Db::Tx(_))
    }

    /// Same dao with every before-hook disabled
    pub fn without_before_hooks(&self) -> Dao<'c> {
        Dao {
            hooks: self.hooks.without_before_hooks(),
            ..self.clone()
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> SqliteResult<T>) -> SqliteResult<T> {
        match &self.db {
            Db::Pool(pool) => pool.with_connection(f),
            Db::Tx(conn) => f(conn),
        }
    }

    /// Execute a statement with neutral placeholders, bounded by the ad-hoc query timeout
    pub fn execute(&self, sql: &str, params: &Params) -> SqliteResult<usize> {
        self.execute_with_timeout(sql, params, self.config.adhoc_query_timeout())
    }

    /// Run a query with neutral placeholders, bounded by the ad-hoc query timeout
    pub fn query_rows(&self, sql: &str, params: &Params) -> SqliteResult<Vec<Row>> {
        self.query_rows_with_timeout(sql, params, self.config.adhoc_query_timeout())
    }

    pub(crate) fn execute_with_timeout(
        &self,
        sql: &str,
        params: &Params,
        timeout: Duration,
    ) -> SqliteResult<usize> {
        let sql = self.dialect().render(sql);
        trace!(sql = %sql, "Executing statement");
        self.with_conn(|conn| {
            with_deadline(conn, timeout, || {
                let mut stmt = conn.prepare(&sql)?;
                bind_params(&mut stmt, params)?;
                Ok(stmt.raw_execute()?)
            })
        })
    }

    pub(crate) fn query_rows_with_timeout(
        &self,
        sql: &str,
        params: &Params,
        timeout: Duration,
    ) -> SqliteResult<Vec<Row>> {
        let sql = self.dialect().render(sql);
        trace!(sql = %sql, "Running query");
        self.with_conn(|conn| {
            with_deadline(conn, timeout, || {
                let mut stmt = conn.prepare(&sql)?;
                let names: Vec<String> =
                    stmt.column_names().into_iter().map(str::to_string).collect();
                bind_params(&mut stmt, params)?;

                let mut rows = stmt.raw_query();
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut decoded = Row::new();
                    for (index, name) in names.iter().enumerate() {
                        decoded.insert(name.clone(), json_from_sql(row.get_ref(index)?));
                    }
                    out.push(decoded);
                }
                Ok(out)
            })
        })
    }

    /// Run `f` inside a write transaction.
    ///
    /// Nested calls reuse the enclosing transaction. After-hooks fired inside
    /// are queued and replayed once the outermost transaction has committed;
    /// on rollback they are dropped.
    pub fn run_in_transaction<T, F>(&self, f: F) -> SqliteResult<T>
    where
        F: FnOnce(&Dao<'_>) -> SqliteResult<T>,
    {
        let pool = match &self.db {
            Db::Tx(_) => return f(self),
            Db::Pool(pool) => pool,
        };

        let queue: RefCell<Vec<QueuedHook>> = RefCell::new(Vec::new());
        let value = pool.with_connection_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            debug!("Transaction started");

            let result = {
                let tx_dao = Dao {
                    db: Db::Tx(&*tx),
                    config: Arc::clone(&self.config),
                    hooks: self.hooks.clone(),
                    after_queue: Some(&queue),
                };
                f(&tx_dao)
            };

            match result {
                Ok(value) => {
                    tx.commit()?;
                    debug!("Transaction committed");
                    Ok(value)
                }
                Err(e) => {
                    debug!(error = %e, "Transaction rolled back");
                    Err(e)
                }
            }
        })?;

        for hook in queue.into_inner() {
            hook(self)?;
        }
        Ok(value)
    }

    /// Run an after-hook now, or queue it when inside a transaction
    fn after(&self, hook: QueuedHook) -> SqliteResult<()> {
        match self.after_queue {
            Some(queue) => {
                queue.borrow_mut().push(hook);
                Ok(())
            }
            None => hook(self),
        }
    }
}

/// Interrupt whatever `f` runs on `conn` once `timeout` has elapsed
fn with_deadline<T>(
    conn: &Connection,
    timeout: Duration,
    f: impl FnOnce() -> SqliteResult<T>,
) -> SqliteResult<T> {
    let deadline = Instant::now() + timeout;
    let _ = conn.progress_handler(1000, Some(move || Instant::now() >= deadline));
    let result = f();
    let _ = conn.progress_handler(0, None::<fn() -> bool>);

    result.map_err(|e| match e {
        SqliteError::Rusqlite(err)
            if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) =>
        {
            SqliteError::Timeout(format!("statement exceeded {:?}", timeout))
        }
        other => other,
    })
}

fn bind_params(stmt: &mut Statement<'_>, params: &Params) -> SqliteResult<()> {
    for (name, value) in params {
        if let Some(index) = stmt.parameter_index(&format!(":{}", name))? {
            stmt.raw_bind_parameter(index, json_to_sql(value))?;
        }
    }
    Ok(())
}

/// Lists and objects are stored as JSON text
fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn json_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dao() -> Dao<'static> {
        Dao::new(SqlitePool::memory().expect("Failed to create pool"))
    }

    fn setup_table(dao: &Dao<'_>) {
        dao.execute(
            "CREATE TABLE {{items}} ([[id]] TEXT PRIMARY KEY, [[n]] INTEGER, [[tags]] TEXT)",
            &Params::new(),
        )
        .expect("Failed to create table");
    }

    #[test]
    fn test_execute_and_query_with_named_params() {
        let dao = dao();
        setup_table(&dao);

        let params = Params::from([
            ("id".to_string(), json!("a")),
            ("n".to_string(), json!(3)),
            ("tags".to_string(), json!(["x", "y"])),
        ]);
        let affected = dao
            .execute(
                "INSERT INTO {{items}} ([[id]], [[n]], [[tags]]) VALUES ({:id}, {:n}, {:tags})",
                &params,
            )
            .expect("Failed to insert");
        assert_eq!(affected, 1);

        let rows = dao
            .query_rows("SELECT * FROM {{items}}", &Params::new())
            .expect("Failed to query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], json!(3));
        assert_eq!(rows[0]["tags"], json!("[\"x\",\"y\"]"));
    }

    #[test]
    fn test_unused_params_are_ignored() {
        let dao = dao();
        let params = Params::from([("unused".to_string(), json!(1))]);
        let rows = dao.query_rows("SELECT 1 AS one", &params).expect("Failed to query");
        assert_eq!(rows[0]["one"], json!(1));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let dao = dao();
        setup_table(&dao);

        let result: SqliteResult<()> = dao.run_in_transaction(|tx| {
            tx.execute("INSERT INTO {{items}} ([[id]]) VALUES ('a')", &Params::new())?;
            Err(SqliteError::InvalidOperation("abort".to_string()))
        });
        assert!(result.is_err());

        let rows = dao
            .query_rows("SELECT * FROM {{items}}", &Params::new())
            .expect("Failed to query");
        assert!(rows.is_empty());
    }

    #[test]
    fn test_nested_transaction_reuses_outer() {
        let dao = dao();
        setup_table(&dao);

        dao.run_in_transaction(|tx| {
            assert!(tx.is_transactional());
            tx.run_in_transaction(|inner| {
                inner.execute("INSERT INTO {{items}} ([[id]]) VALUES ('a')", &Params::new())
            })?;
            Ok(())
        })
        .expect("Transaction failed");

        let rows = dao
            .query_rows("SELECT * FROM {{items}}", &Params::new())
            .expect("Failed to query");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_adhoc_timeout_interrupts_statement() {
        let pool = SqlitePool::new(SqliteConfig::memory().with_adhoc_query_timeout_secs(0))
            .expect("Failed to create pool");
        let dao = Dao::new(pool);

        let result = dao.query_rows(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
            &Params::new(),
        );
        assert!(matches!(result, Err(SqliteError::Timeout(_))));
    }
}
