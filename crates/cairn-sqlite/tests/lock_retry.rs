//! Lock-retry against a second writer holding the database file

use cairn_core::{Collection, FieldOptions, Record, Schema, SchemaField, TextOptions};
use cairn_sqlite::{Dao, Hooks, SqliteConfig, SqlitePool};
use rusqlite::Connection;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn file_dao(dir: &TempDir, max_attempts: usize) -> Dao<'static> {
    let config = SqliteConfig::new(dir.path().join("data.db"))
        .with_busy_timeout_ms(0)
        .with_max_lock_retries(max_attempts)
        .with_lock_retry_backoff_ms(vec![50, 100, 150]);
    Dao::new(SqlitePool::new(config).expect("Failed to open database"))
}

fn posts(dao: &Dao<'_>) -> Arc<Collection> {
    let mut posts = Collection::new_base("posts").with_schema(Schema::new([SchemaField::new(
        "title",
        FieldOptions::Text(TextOptions::default()),
    )]));
    dao.save_collection(&mut posts).expect("Failed to save collection");
    Arc::new(posts)
}

/// Hold an exclusive write lock on the file for `hold`, signalling once taken
fn hold_lock(dir: &TempDir, hold: Duration) -> thread::JoinHandle<()> {
    let path = dir.path().join("data.db");
    let (locked_tx, locked_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let conn = Connection::open(path).expect("Failed to open second connection");
        conn.execute_batch("BEGIN EXCLUSIVE").expect("Failed to lock");
        locked_tx.send(()).expect("Failed to signal");
        thread::sleep(hold);
        conn.execute_batch("COMMIT").expect("Failed to release");
    });
    locked_rx.recv().expect("Lock thread died");
    handle
}

#[test]
fn test_save_waits_out_a_short_lock() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let before_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&before_calls);
    let dao = file_dao(&dir, 8).with_hooks(Hooks::new().on_before_create(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    let posts = posts(&dao);

    let holder = hold_lock(&dir, Duration::from_millis(200));

    let mut record = Record::new(posts);
    record.set("title", json!("hello"));
    dao.save_record(&mut record).expect("Save should succeed after retrying");
    holder.join().expect("Lock thread panicked");

    assert_eq!(before_calls.load(Ordering::SeqCst), 1);
    let stored = dao
        .find_record_by_id("posts", &record.get_string("id"))
        .expect("Record missing");
    assert_eq!(stored.get_string("title"), "hello");
}

#[test]
fn test_lock_error_surfaces_after_last_attempt() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let dao = file_dao(&dir, 2);
    let posts = posts(&dao);

    let holder = hold_lock(&dir, Duration::from_millis(1500));

    let mut record = Record::new(posts);
    let err = dao.save_record(&mut record).expect_err("Save should give up");
    assert!(err.is_lock_error(), "unexpected error: {}", err);
    holder.join().expect("Lock thread panicked");
}
