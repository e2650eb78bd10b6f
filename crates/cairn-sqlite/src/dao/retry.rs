use super::Dao;
use crate::error::SqliteResult;
use std::thread;
use tracing::warn;

impl<'c> Dao<'c> {
    /// Run `op` until it succeeds, fails with a non-lock error, or the
    /// configured attempts are used up. Retries run with before-hooks disabled
    /// so they fire at most once per logical write.
    pub fn lock_retry<T>(&self, mut op: impl FnMut(&Dao<'c>) -> SqliteResult<T>) -> SqliteResult<T> {
        let max_attempts = self.config.max_lock_retries.max(1);
        let mut attempt = 1;

        loop {
            let result = if attempt == 1 {
                op(self)
            } else {
                op(&self.without_before_hooks())
            };

            match result {
                Err(e) if attempt < max_attempts && e.is_lock_error() => {
                    let delay = self.config.lock_retry_delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Database locked, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
