//! SQLite connection and query configuration

use crate::error::{SqliteError, SqliteResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Backoff between lock-retry attempts, in milliseconds. The last entry caps longer runs.
pub const DEFAULT_LOCK_RETRY_BACKOFF_MS: [u64; 8] = [100, 250, 350, 500, 700, 1000, 1200, 1500];

/// Connection, pragma and query execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file, `:memory:` for an in-memory database
    pub path: PathBuf,
    pub wal_mode: bool,
    pub foreign_keys: bool,
    /// Driver-level busy wait before SQLITE_BUSY surfaces
    pub busy_timeout_ms: u32,
    pub cache_size: i32,
    /// Total attempts made by lock-retry
    pub max_lock_retries: usize,
    pub lock_retry_backoff_ms: Vec<u64>,
    pub model_query_timeout_secs: u64,
    pub adhoc_query_timeout_secs: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            wal_mode: true,
            foreign_keys: true,
            busy_timeout_ms: 5000,
            cache_size: -16000,
            max_lock_retries: 8,
            lock_retry_backoff_ms: DEFAULT_LOCK_RETRY_BACKOFF_MS.to_vec(),
            model_query_timeout_secs: 30,
            adhoc_query_timeout_secs: 120,
        }
    }
}

impl SqliteConfig {
    /// File-backed database at `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// In-memory database (WAL is meaningless there)
    pub fn memory() -> Self {
        Self {
            wal_mode: false,
            ..Self::default()
        }
    }

    pub fn from_toml_str(contents: &str) -> SqliteResult<Self> {
        toml::from_str(contents).map_err(|e| SqliteError::Config(e.to_string()))
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> SqliteResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SqliteError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn is_memory(&self) -> bool {
        self.path.to_str() == Some(":memory:")
    }

    pub fn with_wal_mode(mut self, enabled: bool) -> Self {
        self.wal_mode = enabled;
        self
    }

    pub fn with_busy_timeout_ms(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn with_max_lock_retries(mut self, attempts: usize) -> Self {
        self.max_lock_retries = attempts;
        self
    }

    pub fn with_lock_retry_backoff_ms(mut self, backoff: Vec<u64>) -> Self {
        self.lock_retry_backoff_ms = backoff;
        self
    }

    pub fn with_model_query_timeout_secs(mut self, secs: u64) -> Self {
        self.model_query_timeout_secs = secs;
        self
    }

    pub fn with_adhoc_query_timeout_secs(mut self, secs: u64) -> Self {
        self.adhoc_query_timeout_secs = secs;
        self
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn lock_retry_delay(&self, attempt: usize) -> Duration {
        let table = &self.lock_retry_backoff_ms;
        let ms = table
            .get(attempt.saturating_sub(1))
            .or_else(|| table.last())
            .copied()
            .unwrap_or_default();
        Duration::from_millis(ms)
    }

    pub fn model_query_timeout(&self) -> Duration {
        Duration::from_secs(self.model_query_timeout_secs)
    }

    pub fn adhoc_query_timeout(&self) -> Duration {
        Duration::from_secs(self.adhoc_query_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_defaults() {
        let config = SqliteConfig::default();
        assert!(config.is_memory());
        assert_eq!(config.max_lock_retries, 8);
        assert_eq!(config.model_query_timeout(), Duration::from_secs(30));
        assert_eq!(config.adhoc_query_timeout(), Duration::from_secs(120));
    }

    #[test_case(1, 100)]
    #[test_case(3, 350)]
    #[test_case(8, 1500)]
    #[test_case(20, 1500 ; "capped at last entry")]
    fn test_lock_retry_delay(attempt: usize, expected_ms: u64) {
        let config = SqliteConfig::default();
        assert_eq!(
            config.lock_retry_delay(attempt),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn test_from_toml_partial() {
        let config = SqliteConfig::from_toml_str(
            r#"
            path = "data/app.db"
            busy_timeout_ms = 0
            max_lock_retries = 3
            "#,
        )
        .expect("Failed to parse config");

        assert_eq!(config.path, PathBuf::from("data/app.db"));
        assert_eq!(config.busy_timeout_ms, 0);
        assert_eq!(config.max_lock_retries, 3);
        assert!(config.wal_mode);
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = SqliteConfig::from_toml_str("max_lock_retries = \"many\"").unwrap_err();
        assert!(matches!(err, SqliteError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let file = dir.path().join("cairn.toml");
        std::fs::write(&file, "cache_size = -2000\n").expect("Failed to write config");

        let config = SqliteConfig::load(&file).expect("Failed to load config");
        assert_eq!(config.cache_size, -2000);
    }
}
