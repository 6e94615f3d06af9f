//! TTL key-value cache over SQLite.
//!
//! Two disciplines share one table, distinguished by `kind`: id-mapping
//! entries are effectively permanent (10-year expiry, never swept by
//! cleanup), provider-data entries honour per-source TTLs. Every database
//! error here is logged and degraded - a broken cache is a slow run, not a
//! failed one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{Row, SqlitePool};
use tracing::{debug, error, info};

/// Sentinel expiry for id-mapping entries: ten years.
pub const ID_MAPPING_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    IdMapping,
    ProviderData,
}

impl CacheKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IdMapping => "id-mapping",
            Self::ProviderData => "provider-data",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub kind: String,
}

/// Hit/miss counters and the cleanup stamp, shared by all repository handles.
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    last_cleanup: Mutex<Instant>,
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            last_cleanup: Mutex::new(Instant::now()),
        }
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    pub id_mappings: u64,
    pub provider_data: u64,
    pub blacklisted: u64,
}

/// Repository over the `availability_cache` table.
#[derive(Clone)]
pub struct CacheRepository {
    pool: SqlitePool,
    stats: Arc<CacheStats>,
    cleanup_interval: Duration,
}

fn timestamp_str(dt: DateTime<Utc>) -> String {
    // Fixed millisecond precision keeps the stored strings lexicographically
    // comparable in SQL.
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl CacheRepository {
    pub fn new(pool: SqlitePool, stats: Arc<CacheStats>, cleanup_interval: Duration) -> Self {
        Self {
            pool,
            stats,
            cleanup_interval,
        }
    }

    fn id_mapping_key(imdb_id: &str) -> String {
        format!("id-mapping:{imdb_id}")
    }

    fn provider_data_key(tmdb_id: i64, country: Option<&str>) -> String {
        match country {
            Some(c) => format!("providers:{tmdb_id}:{c}"),
            None => format!("providers:{tmdb_id}"),
        }
    }

    /// Cache key for an aggregated availability record.
    pub fn availability_key(imdb_id: &str, countries: &[String]) -> String {
        let mut sorted = countries.to_vec();
        sorted.sort();
        format!("availability:{imdb_id}:{}", sorted.join("_"))
    }

    /// Fetch a non-expired entry. Expired entries are deleted on read.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let row = match sqlx::query(
            "SELECT key, payload, created_at, expires_at, kind FROM availability_cache WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                error!(key, error = %e, "cache read failed");
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let Some(row) = row else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let expires_at_raw: String = row.get("expires_at");
        let Some(expires_at) = parse_timestamp(&expires_at_raw) else {
            error!(key, raw = %expires_at_raw, "unparseable expiry in cache, dropping entry");
            self.delete(key).await;
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if Utc::now() > expires_at {
            debug!(key, "cache entry expired, removing");
            self.delete(key).await;
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let payload_raw: String = row.get("payload");
        let payload = match serde_json::from_str(&payload_raw) {
            Ok(v) => v,
            Err(e) => {
                error!(key, error = %e, "corrupt cache payload, dropping entry");
                self.delete(key).await;
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        let created_at_raw: String = row.get("created_at");
        Some(CacheEntry {
            key: row.get("key"),
            payload,
            created_at: parse_timestamp(&created_at_raw).unwrap_or_else(Utc::now),
            expires_at,
            kind: row.get("kind"),
        })
    }

    /// Upsert an entry with `expires_at = now + ttl`. Returns false on error.
    pub async fn put(&self, key: &str, payload: &JsonValue, ttl: Duration, kind: CacheKind) -> bool {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(3650));

        let payload_str = match serde_json::to_string(payload) {
            Ok(s) => s,
            Err(e) => {
                error!(key, error = %e, "cache payload serialisation failed");
                return false;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT OR REPLACE INTO availability_cache (key, payload, created_at, expires_at, kind)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(&payload_str)
        .bind(timestamp_str(now))
        .bind(timestamp_str(expires_at))
        .bind(kind.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(key, ttl_secs = ttl.as_secs(), kind = kind.as_str(), "cached");
                self.maybe_cleanup().await;
                true
            }
            Err(e) => {
                error!(key, error = %e, "cache write failed");
                false
            }
        }
    }

    async fn delete(&self, key: &str) {
        if let Err(e) = sqlx::query("DELETE FROM availability_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
        {
            error!(key, error = %e, "cache delete failed");
        }
    }

    /// TMDB id for an IMDb id, if cached.
    pub async fn get_id_mapping(&self, imdb_id: &str) -> Option<i64> {
        let entry = self.get(&Self::id_mapping_key(imdb_id)).await?;
        let tmdb_id = entry.payload.get("tmdb_id")?.as_i64()?;
        debug!(imdb_id, tmdb_id, "id mapping cache hit");
        Some(tmdb_id)
    }

    /// Store an IMDb -> TMDB id mapping. Effectively permanent.
    pub async fn put_id_mapping(&self, imdb_id: &str, tmdb_id: i64) -> bool {
        let payload = serde_json::json!({ "imdb_id": imdb_id, "tmdb_id": tmdb_id });
        self.put(
            &Self::id_mapping_key(imdb_id),
            &payload,
            ID_MAPPING_TTL,
            CacheKind::IdMapping,
        )
        .await
    }

    /// Cached provider data for a TMDB id, optionally country-scoped.
    pub async fn get_provider_data(&self, tmdb_id: i64, country: Option<&str>) -> Option<JsonValue> {
        let entry = self.get(&Self::provider_data_key(tmdb_id, country)).await?;
        Some(entry.payload)
    }

    /// Store provider data. The payload is sanitised first: provider keys are
    /// trimmed and empty ones dropped.
    pub async fn put_provider_data(
        &self,
        tmdb_id: i64,
        country: Option<&str>,
        payload: &JsonValue,
        ttl: Duration,
    ) -> bool {
        let sanitised = sanitise_provider_map(payload);
        self.put(
            &Self::provider_data_key(tmdb_id, country),
            &sanitised,
            ttl,
            CacheKind::ProviderData,
        )
        .await
    }

    /// Delete provider-data entries for a TMDB id. With a country, exactly
    /// one entry; without, the un-scoped entry plus every country-scoped one.
    #[allow(dead_code)]
    pub async fn invalidate_provider_data(&self, tmdb_id: i64, country: Option<&str>) -> u64 {
        let result = match country {
            Some(c) => {
                sqlx::query("DELETE FROM availability_cache WHERE key = ?")
                    .bind(Self::provider_data_key(tmdb_id, Some(c)))
                    .execute(&self.pool)
                    .await
            }
            None => {
                sqlx::query("DELETE FROM availability_cache WHERE key = ? OR key LIKE ?")
                    .bind(Self::provider_data_key(tmdb_id, None))
                    .bind(format!("providers:{tmdb_id}:%"))
                    .execute(&self.pool)
                    .await
            }
        };

        match result {
            Ok(r) => {
                let removed = r.rows_affected();
                if removed > 0 {
                    debug!(tmdb_id, removed, "invalidated provider data");
                }
                removed
            }
            Err(e) => {
                error!(tmdb_id, error = %e, "cache invalidation failed");
                0
            }
        }
    }

    /// Delete all expired provider-data rows. Id mappings are never swept.
    pub async fn cleanup_expired(&self) -> u64 {
        let now = timestamp_str(Utc::now());
        let result = sqlx::query(
            "DELETE FROM availability_cache WHERE expires_at <= ? AND kind = 'provider-data'",
        )
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) => {
                let removed = r.rows_affected();
                if removed > 0 {
                    info!(removed, "cleaned up expired cache entries");
                }
                removed
            }
            Err(e) => {
                error!(error = %e, "cache cleanup failed");
                0
            }
        }
    }

    /// Run `cleanup_expired` at most once per configured interval.
    pub async fn maybe_cleanup(&self) {
        let due = {
            let mut last = self.stats.last_cleanup.lock();
            if last.elapsed() >= self.cleanup_interval {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            self.cleanup_expired().await;
        }
    }

    /// Hit/miss counters plus table sizes per kind and blacklist size.
    pub async fn statistics(&self) -> CacheStatistics {
        let hit_count = self.stats.hits.load(Ordering::Relaxed);
        let miss_count = self.stats.misses.load(Ordering::Relaxed);
        let total = hit_count + miss_count;
        let hit_rate = if total > 0 {
            (hit_count as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        let count = |kind: &'static str| {
            let pool = self.pool.clone();
            async move {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM availability_cache WHERE kind = ?",
                )
                .bind(kind)
                .fetch_one(&pool)
                .await
                .unwrap_or(0) as u64
            }
        };

        let blacklisted = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM provider_blacklist")
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0) as u64;

        CacheStatistics {
            hit_count,
            miss_count,
            hit_rate: (hit_rate * 100.0).round() / 100.0,
            id_mappings: count("id-mapping").await,
            provider_data: count("provider-data").await,
            blacklisted,
        }
    }

    /// Truncate one kind, or the whole table.
    #[allow(dead_code)]
    pub async fn clear(&self, kind: Option<CacheKind>) -> u64 {
        let result = match kind {
            Some(k) => {
                sqlx::query("DELETE FROM availability_cache WHERE kind = ?")
                    .bind(k.as_str())
                    .execute(&self.pool)
                    .await
            }
            None => {
                sqlx::query("DELETE FROM availability_cache")
                    .execute(&self.pool)
                    .await
            }
        };

        match result {
            Ok(r) => {
                let removed = r.rows_affected();
                info!(removed, "cleared cache entries");
                removed
            }
            Err(e) => {
                error!(error = %e, "cache clear failed");
                0
            }
        }
    }
}

/// Drop entries with empty provider keys and trim the rest. Non-object
/// payloads pass through untouched.
fn sanitise_provider_map(payload: &JsonValue) -> JsonValue {
    let Some(map) = payload.as_object() else {
        return payload.clone();
    };

    let mut clean = serde_json::Map::new();
    for (key, value) in map {
        let trimmed = key.trim();
        if trimmed.is_empty() || value.is_null() {
            continue;
        }
        clean.insert(trimmed.to_string(), value.clone());
    }
    JsonValue::Object(clean)
}
