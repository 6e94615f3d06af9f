//! Sonarr v3 API client and the PVR capability it implements.
//!
//! Monitor mutations work read-modify-write on the raw series JSON so that
//! every field Sonarr sent comes back in the PUT, including ones this crate
//! has no model for. Server errors and connection failures retry a few times
//! with a growing delay before the operation is reported unreachable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SonarrConfig;
use crate::error::Error;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// A series as the PVR reports it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub monitored: bool,
    /// Raw timestamp string; parsed leniently via [`Series::added_at`].
    #[serde(default)]
    pub added: Option<String>,
    #[serde(default)]
    pub imdb_id: Option<String>,
    #[serde(default)]
    pub tvdb_id: Option<i64>,
    #[serde(default)]
    pub seasons: Vec<Season>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Season {
    pub season_number: i64,
    #[serde(default)]
    pub monitored: bool,
}

impl Series {
    /// Parse the `added` timestamp. Returns `None` for missing or
    /// malformed values - callers treat that as "not recent".
    pub fn added_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.added.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    /// Monitored season numbers, excluding season 0 (specials).
    pub fn monitored_season_numbers(&self) -> Vec<i64> {
        let mut numbers: Vec<i64> = self
            .seasons
            .iter()
            .filter(|s| s.monitored && s.season_number != 0)
            .map(|s| s.season_number)
            .collect();
        numbers.sort_unstable();
        numbers
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Episode {
    #[allow(dead_code)]
    id: i64,
    season_number: i64,
    #[serde(default)]
    has_file: bool,
    #[serde(default)]
    episode_file: Option<EpisodeFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct EpisodeFile {
    id: i64,
}

/// Outcome of the composite unmonitor-and-delete operation.
#[derive(Debug, Clone)]
pub struct SeasonRemoval {
    pub files_deleted: bool,
    pub detail: Option<String>,
}

/// The PVR operations the engine depends on.
#[async_trait]
pub trait PvrClient: Send + Sync {
    async fn test_connection(&self) -> Result<(), Error>;
    async fn list_monitored_series(&self) -> Result<Vec<Series>, Error>;
    async fn series(&self, id: i64) -> Result<Series, Error>;
    async fn unmonitor_series(&self, id: i64) -> Result<(), Error>;
    async fn unmonitor_season(&self, id: i64, season_number: i64) -> Result<(), Error>;
    async fn delete_series(&self, id: i64, delete_files: bool) -> Result<(), Error>;
    async fn delete_season_files(&self, id: i64, season_number: i64) -> Result<(), Error>;

    /// Unmonitor a season, then delete its files. Unmonitoring must succeed
    /// (it is what prevents the PVR from re-downloading); file deletion is
    /// best effort and only degrades the outcome.
    async fn unmonitor_and_delete_season(
        &self,
        id: i64,
        season_number: i64,
    ) -> Result<SeasonRemoval, Error> {
        self.unmonitor_season(id, season_number).await?;

        match self.delete_season_files(id, season_number).await {
            Ok(()) => Ok(SeasonRemoval {
                files_deleted: true,
                detail: None,
            }),
            Err(e) => {
                warn!(
                    series_id = id,
                    season = season_number,
                    error = %e,
                    "season unmonitored but file deletion failed"
                );
                Ok(SeasonRemoval {
                    files_deleted: false,
                    detail: Some(e.to_string()),
                })
            }
        }
    }
}

/// Sonarr API client.
pub struct SonarrClient {
    base_url: String,
    client: Client,
}

impl SonarrClient {
    pub fn new(config: &SonarrConfig) -> Result<Self, Error> {
        if config.api_key.is_empty() {
            return Err(Error::ConfigInvalid("sonarr API key cannot be empty".to_string()));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        let mut key_value = reqwest::header::HeaderValue::from_str(&config.api_key)
            .map_err(|_| Error::ConfigInvalid("sonarr API key contains invalid characters".to_string()))?;
        key_value.set_sensitive(true);
        headers.insert("X-Api-Key", key_value);

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        params: Option<&[(&str, String)]>,
        body: Option<&JsonValue>,
    ) -> Result<Response, Error> {
        let url = format!("{}/api/v3/{}", self.base_url, path);

        let mut attempt = 0;
        loop {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(params) = params {
                request = request.query(params);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(%method, %url, attempt, "sonarr request");
            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        attempt += 1;
                        warn!(error = %e, attempt, "sonarr connection error, retrying");
                        tokio::time::sleep(RETRY_DELAY * attempt).await;
                        continue;
                    }
                    return Err(Error::PvrUnreachable(e.to_string()));
                }
            };

            let status = response.status().as_u16();
            if status == 401 {
                return Err(Error::pvr_rejected(
                    path,
                    "authentication failed - check your API key",
                ));
            }
            if status >= 500 {
                if attempt < MAX_RETRIES {
                    attempt += 1;
                    warn!(status, attempt, "sonarr server error, retrying");
                    tokio::time::sleep(RETRY_DELAY * attempt).await;
                    continue;
                }
                return Err(Error::PvrUnreachable(format!(
                    "server error HTTP {status} after {MAX_RETRIES} retries"
                )));
            }
            if status >= 400 {
                let message = response
                    .json::<JsonValue>()
                    .await
                    .ok()
                    .and_then(|v| v.get("message").and_then(|m| m.as_str().map(String::from)))
                    .unwrap_or_else(|| format!("HTTP {status}"));
                return Err(Error::pvr_rejected(path, message));
            }

            return Ok(response);
        }
    }

    async fn series_raw(&self, id: i64) -> Result<JsonValue, Error> {
        let response = self
            .request(Method::GET, &format!("series/{id}"), None, None)
            .await?;
        response
            .json::<JsonValue>()
            .await
            .map_err(|e| Error::PvrUnreachable(e.to_string()))
    }

    async fn put_series(&self, id: i64, series: &JsonValue) -> Result<(), Error> {
        self.request(Method::PUT, &format!("series/{id}"), None, Some(series))
            .await?;
        Ok(())
    }

    async fn season_episodes(&self, id: i64, season_number: i64) -> Result<Vec<Episode>, Error> {
        let response = self
            .request(
                Method::GET,
                "episode",
                Some(&[("seriesId", id.to_string())]),
                None,
            )
            .await?;
        let episodes: Vec<Episode> = response
            .json()
            .await
            .map_err(|e| Error::PvrUnreachable(e.to_string()))?;

        Ok(episodes
            .into_iter()
            .filter(|e| e.season_number == season_number)
            .collect())
    }
}

/// Flip `monitored` off for the series and every season, in place.
fn set_series_unmonitored(series: &mut JsonValue) {
    series["monitored"] = JsonValue::Bool(false);
    if let Some(seasons) = series.get_mut("seasons").and_then(|s| s.as_array_mut()) {
        for season in seasons {
            season["monitored"] = JsonValue::Bool(false);
        }
    }
}

/// Flip `monitored` off for one season. Returns false when the season is
/// not present in the payload.
fn set_season_unmonitored(series: &mut JsonValue, season_number: i64) -> bool {
    let Some(seasons) = series.get_mut("seasons").and_then(|s| s.as_array_mut()) else {
        return false;
    };
    for season in seasons {
        if season.get("seasonNumber").and_then(JsonValue::as_i64) == Some(season_number) {
            season["monitored"] = JsonValue::Bool(false);
            return true;
        }
    }
    false
}

#[async_trait]
impl PvrClient for SonarrClient {
    async fn test_connection(&self) -> Result<(), Error> {
        let response = self
            .request(Method::GET, "system/status", None, None)
            .await?;
        let status: JsonValue = response
            .json()
            .await
            .map_err(|e| Error::PvrUnreachable(e.to_string()))?;
        let version = status
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        info!(version, "connected to Sonarr");
        Ok(())
    }

    async fn list_monitored_series(&self) -> Result<Vec<Series>, Error> {
        let response = self.request(Method::GET, "series", None, None).await?;
        let all: Vec<Series> = response
            .json()
            .await
            .map_err(|e| Error::PvrUnreachable(e.to_string()))?;

        let total = all.len();
        let monitored: Vec<Series> = all.into_iter().filter(|s| s.monitored).collect();
        debug!(monitored = monitored.len(), total, "fetched series from Sonarr");
        Ok(monitored)
    }

    async fn series(&self, id: i64) -> Result<Series, Error> {
        let response = self
            .request(Method::GET, &format!("series/{id}"), None, None)
            .await?;
        response
            .json()
            .await
            .map_err(|e| Error::PvrUnreachable(e.to_string()))
    }

    async fn unmonitor_series(&self, id: i64) -> Result<(), Error> {
        let mut series = self.series_raw(id).await?;
        set_series_unmonitored(&mut series);
        self.put_series(id, &series).await?;
        info!(series_id = id, "unmonitored series");
        Ok(())
    }

    async fn unmonitor_season(&self, id: i64, season_number: i64) -> Result<(), Error> {
        let mut series = self.series_raw(id).await?;
        if !set_season_unmonitored(&mut series, season_number) {
            return Err(Error::pvr_rejected(
                format!("series/{id}"),
                format!("season {season_number} not found"),
            ));
        }
        self.put_series(id, &series).await?;
        info!(series_id = id, season = season_number, "unmonitored season");
        Ok(())
    }

    async fn delete_series(&self, id: i64, delete_files: bool) -> Result<(), Error> {
        self.request(
            Method::DELETE,
            &format!("series/{id}"),
            Some(&[("deleteFiles", delete_files.to_string())]),
            None,
        )
        .await?;
        info!(series_id = id, delete_files, "deleted series");
        Ok(())
    }

    async fn delete_season_files(&self, id: i64, season_number: i64) -> Result<(), Error> {
        let episodes = self.season_episodes(id, season_number).await?;

        let mut total = 0u32;
        let mut deleted = 0u32;
        for episode in episodes {
            let Some(file) = episode.episode_file.filter(|_| episode.has_file) else {
                continue;
            };
            total += 1;
            match self
                .request(Method::DELETE, &format!("episodefile/{}", file.id), None, None)
                .await
            {
                Ok(_) => deleted += 1,
                Err(e) => {
                    warn!(
                        series_id = id,
                        season = season_number,
                        file_id = file.id,
                        error = %e,
                        "failed to delete episode file"
                    );
                }
            }
        }

        if total == 0 {
            info!(series_id = id, season = season_number, "no files to delete");
        } else {
            info!(
                series_id = id,
                season = season_number,
                deleted,
                total,
                "deleted season episode files"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_series_json() -> JsonValue {
        json!({
            "id": 42,
            "title": "Breaking Bad",
            "monitored": true,
            "added": "2024-01-01T00:00:00Z",
            "imdbId": "tt0903747",
            "tvdbId": 81189,
            "qualityProfileId": 6,
            "path": "/tv/Breaking Bad",
            "seasons": [
                {"seasonNumber": 0, "monitored": false},
                {"seasonNumber": 1, "monitored": true},
                {"seasonNumber": 2, "monitored": true}
            ]
        })
    }

    #[test]
    fn series_parses_from_sonarr_payload() {
        let series: Series = serde_json::from_value(sample_series_json()).unwrap();
        assert_eq!(series.id, 42);
        assert_eq!(series.imdb_id.as_deref(), Some("tt0903747"));
        assert_eq!(series.tvdb_id, Some(81189));
        assert_eq!(series.seasons.len(), 3);
    }

    #[test]
    fn added_at_is_lenient() {
        let mut series: Series = serde_json::from_value(sample_series_json()).unwrap();
        assert!(series.added_at().is_some());

        series.added = Some("not-a-date".to_string());
        assert!(series.added_at().is_none());

        series.added = None;
        assert!(series.added_at().is_none());
    }

    #[test]
    fn monitored_seasons_exclude_specials() {
        let series: Series = serde_json::from_value(json!({
            "id": 1,
            "title": "T",
            "monitored": true,
            "seasons": [
                {"seasonNumber": 0, "monitored": true},
                {"seasonNumber": 2, "monitored": true},
                {"seasonNumber": 1, "monitored": true},
                {"seasonNumber": 3, "monitored": false}
            ]
        }))
        .unwrap();

        assert_eq!(series.monitored_season_numbers(), vec![1, 2]);
    }

    #[test]
    fn unmonitor_mutation_preserves_unknown_fields() {
        let mut raw = sample_series_json();
        set_series_unmonitored(&mut raw);

        assert_eq!(raw["monitored"], json!(false));
        for season in raw["seasons"].as_array().unwrap() {
            assert_eq!(season["monitored"], json!(false));
        }
        // Fields we don't model must survive for the PUT round-trip.
        assert_eq!(raw["qualityProfileId"], json!(6));
        assert_eq!(raw["path"], json!("/tv/Breaking Bad"));
    }

    #[test]
    fn season_mutation_targets_one_season() {
        let mut raw = sample_series_json();
        assert!(set_season_unmonitored(&mut raw, 1));

        let seasons = raw["seasons"].as_array().unwrap();
        assert_eq!(seasons[1]["monitored"], json!(false));
        assert_eq!(seasons[2]["monitored"], json!(true));

        assert!(!set_season_unmonitored(&mut raw, 9));
    }
}
