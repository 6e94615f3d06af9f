//! Streaming Availability API client (RapidAPI) - secondary source.
//!
//! Adds what TMDB cannot: deep links, stream quality, expiry dates and,
//! when the API reports them, per-season availability. Free tier is a daily
//! quota, and the API signals exhaustion with HTTP 403 - which is
//! indistinguishable from a revoked key, so the ambiguity is logged and the
//! quota treated as burned for safety.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::StreamingAvailabilityConfig;
use crate::error::Error;
use crate::services::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::services::providers::canonical_provider_key;
use crate::services::quota::{QuotaGuard, QuotaStatus, QuotaWindow};
use crate::services::source::{
    validate_imdb_id, AvailabilitySource, CountryOffers, Offer, OfferKind,
};

pub const SOURCE_NAME: &str = "streaming-availability";

const API_HOST: &str = "streaming-availability.p.rapidapi.com";

pub struct StreamingAvailabilityClient {
    client: Client,
    base_url: String,
    api_key: String,
    quota: QuotaGuard,
    breaker: CircuitBreaker,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaShow {
    #[serde(default)]
    pub streaming_options: Vec<SaStreamingOption>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaStreamingOption {
    #[serde(default)]
    pub service: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    /// Unix timestamp of when the offer expires, when known.
    #[serde(default)]
    pub expiring_on: Option<i64>,
    /// Season numbers covered by this option, when the API reports them.
    #[serde(default)]
    pub available_seasons: Vec<i64>,
}

impl StreamingAvailabilityClient {
    pub fn new(config: &StreamingAvailabilityConfig) -> Result<Self, Error> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(Error::ConfigInvalid(
                "streaming_availability requires an API key when enabled".to_string(),
            ))?;

        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: format!("https://{API_HOST}"),
            api_key,
            quota: QuotaGuard::new(SOURCE_NAME, QuotaWindow::Daily, config.daily_quota),
            breaker: CircuitBreaker::with_defaults(SOURCE_NAME),
        })
    }

    async fn fetch_show(&self, imdb_id: &str, country: &str) -> Result<SaShow, Error> {
        let url = format!("{}/shows/{imdb_id}", self.base_url);
        debug!(imdb_id, country, "querying streaming availability");

        let response = self
            .client
            .get(&url)
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", API_HOST)
            .header("Accept", "application/json")
            .query(&[("country", country.to_lowercase())])
            .send()
            .await
            .map_err(|e| Error::request(SOURCE_NAME, &e))?;

        let status = response.status().as_u16();
        match status {
            200 => response
                .json::<SaShow>()
                .await
                .map_err(|e| Error::request(SOURCE_NAME, &e)),
            401 => Err(Error::SourceAuthFailed {
                provider: SOURCE_NAME,
            }),
            403 => {
                // The API uses 403 both for burned quotas and rejected keys.
                // Treat it as quota exhaustion so we stop spending requests,
                // but keep the ambiguity visible in diagnostics.
                warn!(
                    "streaming availability returned HTTP 403; treating as daily quota \
                     exhaustion, but this can also mean an invalid API key"
                );
                self.quota.saturate("HTTP 403 (quota exhausted or key rejected)");
                Err(Error::quota_exceeded(
                    SOURCE_NAME,
                    "HTTP 403 from API".to_string(),
                ))
            }
            404 => Ok(SaShow::default()),
            429 => Err(Error::SourceRateLimited {
                provider: SOURCE_NAME,
            }),
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
}

fn parse_kind(raw: Option<&str>) -> OfferKind {
    match raw.unwrap_or("subscription") {
        "rent" => OfferKind::Rent,
        "buy" => OfferKind::Buy,
        "free" => OfferKind::Free,
        "ads" | "addon" => OfferKind::Ads,
        _ => OfferKind::Subscription,
    }
}

/// Turn the raw streaming options into canonical offers. Multiple options
/// for one service collapse onto the first, filling gaps.
pub fn extract_offers(show: &SaShow) -> CountryOffers {
    let mut offers = CountryOffers::new();

    for option in &show.streaming_options {
        if option.service.trim().is_empty() {
            continue;
        }
        let key = canonical_provider_key(&option.service);
        if key.is_empty() {
            continue;
        }

        let expires_at: Option<DateTime<Utc>> = option
            .expiring_on
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single());

        let incoming = Offer {
            kind: parse_kind(option.kind.as_deref()),
            link: option.link.clone().filter(|l| !l.is_empty()),
            quality: option.quality.clone().filter(|q| !q.is_empty()),
            expires_at,
            seasons: option.available_seasons.clone(),
            source: SOURCE_NAME.to_string(),
        };

        match offers.get_mut(&key) {
            Some(existing) => existing.absorb(&incoming),
            None => {
                offers.insert(key, incoming);
            }
        }
    }

    offers
}

#[async_trait]
impl AvailabilitySource for StreamingAvailabilityClient {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn lookup(&self, imdb_id: &str, country: &str) -> Result<CountryOffers, Error> {
        validate_imdb_id(imdb_id)?;

        // Quota is claimed before the request: an exhausted guard must not
        // cost an HTTP call.
        self.quota.check_and_increment()?;

        if !self.breaker.can_attempt() {
            return Err(Error::CircuitOpen {
                provider: SOURCE_NAME,
            });
        }

        match self.fetch_show(imdb_id, country).await {
            Ok(show) => {
                self.breaker.record_success();
                Ok(extract_offers(&show))
            }
            Err(e @ Error::QuotaExceeded { .. }) => {
                // A remote quota signal is not a source-health failure.
                self.breaker.record_success();
                Err(e)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    fn quota_status(&self) -> Option<QuotaStatus> {
        Some(self.quota.status())
    }

    fn breaker_state(&self) -> Option<BreakerState> {
        Some(self.breaker.state())
    }
}
