//! TMDB (The Movie Database) API client - the primary catalogue source.
//!
//! Base URL: https://api.themoviedb.org/3
//!
//! Series availability is a two-step lookup: `find/{imdb_id}` resolves the
//! IMDb id to a TMDB series id (cached permanently), then
//! `tv/{id}/watch/providers` lists per-country offers (cached per country
//! with the configured TTL). TMDB allows ~40 requests per 10 seconds; this
//! client paces itself and retries transient failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::TmdbConfig;
use crate::db::CacheRepository;
use crate::error::Error;
use crate::services::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::services::providers::canonical_provider_key;
use crate::services::quota::QuotaStatus;
use crate::services::rate_limiter::{retry_async, RateLimitedClient, RetryConfig};
use crate::services::source::{
    validate_imdb_id, AvailabilitySource, CountryOffers, Offer, OfferKind,
};

pub const SOURCE_NAME: &str = "tmdb";

/// TMDB API client with rate limiting, retry logic and its own breaker.
pub struct TmdbClient {
    client: Arc<RateLimitedClient>,
    base_url: String,
    api_key: String,
    retry_config: RetryConfig,
    breaker: CircuitBreaker,
    cache: CacheRepository,
    cache_ttl: Duration,
}

#[derive(Debug, Deserialize)]
struct TmdbFindResponse {
    #[serde(default)]
    tv_results: Vec<TmdbSeriesRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbSeriesRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// `tv/{id}/watch/providers` response: offers grouped by country, then by
/// monetisation bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbWatchProviders {
    #[serde(default)]
    pub results: HashMap<String, TmdbCountryListing>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbCountryListing {
    pub link: Option<String>,
    #[serde(default)]
    pub flatrate: Vec<TmdbProviderRef>,
    #[serde(default)]
    pub free: Vec<TmdbProviderRef>,
    #[serde(default)]
    pub ads: Vec<TmdbProviderRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbProviderRef {
    #[serde(default)]
    pub provider_id: Option<i64>,
    #[serde(default)]
    pub provider_name: String,
}

impl TmdbClient {
    pub fn new(config: &TmdbConfig, cache: CacheRepository) -> Self {
        Self {
            client: Arc::new(RateLimitedClient::for_tmdb(config.rate_limit)),
            base_url: "https://api.themoviedb.org/3".to_string(),
            api_key: config.api_key.clone(),
            retry_config: RetryConfig::default(),
            breaker: CircuitBreaker::with_defaults(SOURCE_NAME),
            cache,
            cache_ttl: Duration::from_secs(config.cache_ttl),
        }
    }

    /// v4 read access tokens are JWTs and go in the Authorization header;
    /// v3 keys ride along as a query parameter.
    fn is_v4_token(&self) -> bool {
        self.api_key.starts_with("eyJ")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        let mut query: Vec<(&str, String)> = params.to_vec();
        let auth_header;
        let mut headers: Vec<(&str, &str)> = vec![("Accept", "application/json")];
        if self.is_v4_token() {
            auth_header = format!("Bearer {}", self.api_key);
            headers.push(("Authorization", auth_header.as_str()));
        } else {
            query.push(("api_key", self.api_key.clone()));
        }

        let response = self
            .client
            .get_with_headers_and_query(&url, &headers, &query)
            .await
            .map_err(|e| Error::request(SOURCE_NAME, &e))?;

        let status = response.status().as_u16();
        match status {
            200 => response
                .json::<T>()
                .await
                .map_err(|e| Error::request(SOURCE_NAME, &e)),
            401 => Err(Error::SourceAuthFailed {
                provider: SOURCE_NAME,
            }),
            404 => Err(Error::NotFound),
            429 => {
                warn!("TMDB rate limit hit");
                Err(Error::SourceRateLimited {
                    provider: SOURCE_NAME,
                })
            }
            s if s >= 500 => Err(Error::Transient {
                provider: SOURCE_NAME,
                status: s,
            }),
            s => Err(Error::Request {
                provider: SOURCE_NAME,
                message: format!("unexpected HTTP {s}"),
            }),
        }
    }

    /// Run a request under the breaker. A 404 is a healthy answer and does
    /// not count against the source.
    async fn guarded<T, F, Fut>(&self, operation: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        if !self.breaker.can_attempt() {
            return Err(Error::CircuitOpen {
                provider: SOURCE_NAME,
            });
        }

        match operation().await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(Error::NotFound) => {
                self.breaker.record_success();
                Err(Error::NotFound)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    /// Resolve a TMDB series id from an IMDb id.
    pub async fn find_series_by_imdb(&self, imdb_id: &str) -> Result<i64, Error> {
        validate_imdb_id(imdb_id)?;
        debug!(imdb_id, "finding TMDB id");

        let path = format!("find/{imdb_id}");
        let params = [("external_source", "imdb_id".to_string())];
        let response: TmdbFindResponse = self
            .guarded(|| {
                retry_async(
                    || self.get_json(&path, &params),
                    &self.retry_config,
                    "tmdb_find_by_imdb",
                )
            })
            .await?;

        let tmdb_id = response
            .tv_results
            .first()
            .map(|r| r.id)
            .ok_or(Error::NotFound)?;

        debug!(imdb_id, tmdb_id, "resolved TMDB id");
        Ok(tmdb_id)
    }

    /// Fetch the per-country watch providers for a series.
    pub async fn watch_providers(&self, tmdb_id: i64) -> Result<TmdbWatchProviders, Error> {
        debug!(tmdb_id, "fetching watch providers");

        let path = format!("tv/{tmdb_id}/watch/providers");
        let params: [(&str, String); 0] = [];
        self.guarded(|| {
            retry_async(
                || self.get_json(&path, &params),
                &self.retry_config,
                "tmdb_watch_providers",
            )
        })
        .await
    }
}

/// Extract the subscription-style offers for one country, with provider
/// names canonicalised. TMDB only proves "included with something the user
/// might pay for" via the flatrate/free/ads buckets; rent and buy listings
/// are not availability in this system's sense.
pub fn extract_country_offers(response: &TmdbWatchProviders, country: &str) -> CountryOffers {
    let mut offers = CountryOffers::new();
    let Some(listing) = response.results.get(country) else {
        return offers;
    };

    let buckets = [
        (&listing.flatrate, OfferKind::Subscription),
        (&listing.free, OfferKind::Free),
        (&listing.ads, OfferKind::Ads),
    ];

    for (providers, kind) in buckets {
        for provider in providers {
            let key = canonical_provider_key(&provider.provider_name);
            if key.is_empty() {
                continue;
            }
            offers.entry(key).or_insert_with(|| Offer {
                kind,
                link: listing.link.clone(),
                quality: None,
                expires_at: None,
                seasons: Vec::new(),
                source: SOURCE_NAME.to_string(),
            });
        }
    }

    offers
}

#[async_trait]
impl AvailabilitySource for TmdbClient {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn lookup(&self, imdb_id: &str, country: &str) -> Result<CountryOffers, Error> {
        validate_imdb_id(imdb_id)?;

        let tmdb_id = match self.cache.get_id_mapping(imdb_id).await {
            Some(id) => id,
            None => {
                let id = self.find_series_by_imdb(imdb_id).await?;
                self.cache.put_id_mapping(imdb_id, id).await;
                id
            }
        };

        if let Some(cached) = self.cache.get_provider_data(tmdb_id, Some(country)).await {
            match serde_json::from_value::<CountryOffers>(cached) {
                Ok(offers) => return Ok(offers),
                Err(e) => warn!(tmdb_id, country, error = %e, "discarding malformed cached provider data"),
            }
        }

        let response = self.watch_providers(tmdb_id).await?;
        let offers = extract_country_offers(&response, country);

        if let Ok(payload) = serde_json::to_value(&offers) {
            self.cache
                .put_provider_data(tmdb_id, Some(country), &payload, self.cache_ttl)
                .await;
        }

        Ok(offers)
    }

    fn quota_status(&self) -> Option<QuotaStatus> {
        // Rate-limited, not quota'd.
        None
    }

    fn breaker_state(&self) -> Option<BreakerState> {
        Some(self.breaker.state())
    }
}
