//! Local SQLite cache database.
//!
//! One file, two tables: `availability_cache` (TTL key-value store for
//! catalogue data) and `provider_blacklist` (per-identifier failure history).
//! Deleting the file resets both; nothing in here ever touches PVR state.

pub mod blacklist;
pub mod cache;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub use blacklist::{BlacklistEntry, BlacklistRepository};
pub use cache::{CacheEntry, CacheKind, CacheRepository, CacheStatistics};

use cache::CacheStats;

/// Database wrapper providing repository access over a shared pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    stats: Arc<CacheStats>,
}

impl Database {
    /// Open (or create) the cache database at `path` and ensure the schema.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open cache database at {}", path.display()))?;

        let db = Self {
            pool,
            stats: Arc::new(CacheStats::new()),
        };
        db.init_schema().await?;

        tracing::debug!(path = %path.display(), "cache database ready");
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), crate::error::Error> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS availability_cache (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'provider-data'
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_cache_expires ON availability_cache(expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_cache_kind ON availability_cache(kind)",
            r#"
            CREATE TABLE IF NOT EXISTS provider_blacklist (
                identifier TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                failure_count INTEGER NOT NULL DEFAULT 1,
                first_failure TEXT NOT NULL,
                last_failure TEXT NOT NULL
            )
            "#,
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| crate::error::Error::Cache(e.to_string()))?;
        }
        Ok(())
    }

    /// Get a cache repository with the given opportunistic-cleanup interval.
    pub fn cache(&self, cleanup_interval: Duration) -> CacheRepository {
        CacheRepository::new(self.pool.clone(), self.stats.clone(), cleanup_interval)
    }

    /// Get a blacklist repository with the given failure threshold.
    pub fn blacklist(&self, threshold: u32) -> BlacklistRepository {
        BlacklistRepository::new(self.pool.clone(), threshold)
    }

    #[allow(dead_code)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
