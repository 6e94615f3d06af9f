//! Per-identifier failure blacklist.
//!
//! Independent of the circuit breaker: the breaker gates a whole source, the
//! blacklist gates one identifier that keeps failing across runs. Errors are
//! logged and degraded like the cache - a blacklist check that fails reads as
//! "not blacklisted".

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{error, warn};

#[derive(Debug, Clone, Serialize)]
pub struct BlacklistEntry {
    pub identifier: String,
    pub reason: String,
    pub failure_count: i64,
    pub first_failure: DateTime<Utc>,
    pub last_failure: DateTime<Utc>,
}

#[derive(Clone)]
pub struct BlacklistRepository {
    pool: SqlitePool,
    threshold: u32,
}

impl BlacklistRepository {
    pub fn new(pool: SqlitePool, threshold: u32) -> Self {
        Self { pool, threshold }
    }

    /// Record a failure: increments `failure_count`, bumps `last_failure`,
    /// preserves `first_failure`.
    pub async fn record_failure(&self, identifier: &str, reason: &str) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let result = sqlx::query(
            r#"
            INSERT OR REPLACE INTO provider_blacklist
                (identifier, reason, failure_count, first_failure, last_failure)
            VALUES (
                ?1, ?2,
                COALESCE((SELECT failure_count + 1 FROM provider_blacklist WHERE identifier = ?1), 1),
                COALESCE((SELECT first_failure FROM provider_blacklist WHERE identifier = ?1), ?3),
                ?3
            )
            "#,
        )
        .bind(identifier)
        .bind(reason)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => warn!(identifier, reason, "recorded lookup failure"),
            Err(e) => error!(identifier, error = %e, "blacklist write failed"),
        }
    }

    /// Whether the identifier has reached the failure threshold.
    pub async fn is_blacklisted(&self, identifier: &str) -> bool {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT failure_count FROM provider_blacklist WHERE identifier = ?",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await;

        match count {
            Ok(Some(count)) => count >= i64::from(self.threshold),
            Ok(None) => false,
            Err(e) => {
                error!(identifier, error = %e, "blacklist check failed");
                false
            }
        }
    }

    #[allow(dead_code)]
    pub async fn entry(&self, identifier: &str) -> Option<BlacklistEntry> {
        let row = sqlx::query(
            r#"
            SELECT identifier, reason, failure_count, first_failure, last_failure
            FROM provider_blacklist WHERE identifier = ?
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| error!(identifier, error = %e, "blacklist read failed"))
        .ok()??;

        let parse = |s: String| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        };

        Some(BlacklistEntry {
            identifier: row.get("identifier"),
            reason: row.get("reason"),
            failure_count: row.get("failure_count"),
            first_failure: parse(row.get("first_failure")),
            last_failure: parse(row.get("last_failure")),
        })
    }

    #[allow(dead_code)]
    pub async fn len(&self) -> u64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM provider_blacklist")
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0) as u64
    }

    #[allow(dead_code)]
    pub async fn clear(&self) -> u64 {
        match sqlx::query("DELETE FROM provider_blacklist")
            .execute(&self.pool)
            .await
        {
            Ok(r) => r.rows_affected(),
            Err(e) => {
                error!(error = %e, "blacklist clear failed");
                0
            }
        }
    }
}
