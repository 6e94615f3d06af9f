//! Utelly API client (RapidAPI) - tertiary, broad-aggregator source.
//!
//! Last resort when neither TMDB nor the secondary source had anything for a
//! country. Utelly's listings carry icons and store-front URLs but no typed
//! monetisation, so the offer kind is inferred from URL patterns.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::UtellyConfig;
use crate::error::Error;
use crate::services::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::services::providers::canonical_provider_key;
use crate::services::quota::{QuotaGuard, QuotaStatus, QuotaWindow};
use crate::services::source::{
    validate_imdb_id, AvailabilitySource, CountryOffers, Offer, OfferKind,
};

pub const SOURCE_NAME: &str = "utelly";

const API_HOST: &str = "utelly-tv-shows-and-movies-availability-v1.p.rapidapi.com";

pub struct UtellyClient {
    client: Client,
    base_url: String,
    api_key: String,
    quota: QuotaGuard,
    breaker: CircuitBreaker,
}

#[derive(Debug, Default, Deserialize)]
pub struct UtellyResponse {
    #[serde(default)]
    pub results: Vec<UtellyResult>,
}

#[derive(Debug, Deserialize)]
pub struct UtellyResult {
    #[serde(default)]
    pub locations: Vec<UtellyLocation>,
}

#[derive(Debug, Deserialize)]
pub struct UtellyLocation {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl UtellyClient {
    pub fn new(config: &UtellyConfig) -> Result<Self, Error> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(Error::ConfigInvalid(
                "utelly requires an API key when enabled".to_string(),
            ))?;

        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: format!("https://{API_HOST}"),
            api_key,
            quota: QuotaGuard::new(SOURCE_NAME, QuotaWindow::Monthly, config.monthly_quota),
            breaker: CircuitBreaker::with_defaults(SOURCE_NAME),
        })
    }

    async fn fetch_lookup(&self, imdb_id: &str, country: &str) -> Result<UtellyResponse, Error> {
        let url = format!("{}/lookup", self.base_url);
        debug!(imdb_id, country, "querying utelly");

        let country_param = country.to_lowercase();
        let response = self
            .client
            .get(&url)
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", API_HOST)
            .header("Accept", "application/json")
            .query(&[("term", imdb_id), ("country", country_param.as_str())])
            .send()
            .await
            .map_err(|e| Error::request(SOURCE_NAME, &e))?;

        let status = response.status().as_u16();
        match status {
            200 => response
                .json::<UtellyResponse>()
                .await
                .map_err(|e| Error::request(SOURCE_NAME, &e)),
            401 | 403 => Err(Error::SourceAuthFailed {
                provider: SOURCE_NAME,
            }),
            404 => Ok(UtellyResponse::default()),
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

/// Infer the monetisation kind from a provider URL. Store fronts that sell
/// and rent map to `Rent` (the conservative claim); bare streaming hosts are
/// assumed to be subscriptions.
pub fn kind_from_url(url: Option<&str>) -> OfferKind {
    let Some(url) = url else {
        return OfferKind::Subscription;
    };
    let url = url.to_lowercase();

    if ["rent", "rental", "verleih"].iter().any(|t| url.contains(t)) {
        OfferKind::Rent
    } else if ["buy", "purchase", "kaufen"].iter().any(|t| url.contains(t)) {
        OfferKind::Buy
    } else if ["itunes", "play.google", "microsoft.com"]
        .iter()
        .any(|t| url.contains(t))
    {
        OfferKind::Rent
    } else {
        OfferKind::Subscription
    }
}

pub fn extract_offers(response: &UtellyResponse) -> CountryOffers {
    let mut offers = CountryOffers::new();

    for result in &response.results {
        for location in &result.locations {
            if location.display_name.trim().is_empty() {
                continue;
            }
            let key = canonical_provider_key(&location.display_name);
            if key.is_empty() {
                continue;
            }

            let incoming = Offer {
                kind: kind_from_url(location.url.as_deref()),
                link: location.url.clone().filter(|u| !u.is_empty()),
                quality: None,
                expires_at: None,
                seasons: Vec::new(),
                source: SOURCE_NAME.to_string(),
            };

            match offers.get_mut(&key) {
                Some(existing) => existing.absorb(&incoming),
                None => {
                    offers.insert(key, incoming);
                }
            }
        }
    }

    offers
}

#[async_trait]
impl AvailabilitySource for UtellyClient {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn lookup(&self, imdb_id: &str, country: &str) -> Result<CountryOffers, Error> {
        validate_imdb_id(imdb_id)?;
        self.quota.check_and_increment()?;

        // 404s never reach the breaker here (fetch_lookup maps them to an
        // empty response), so every surfaced error is a health signal.
        let response = self
            .breaker
            .call(|| self.fetch_lookup(imdb_id, country))
            .await?;
        Ok(extract_offers(&response))
    }

    fn quota_status(&self) -> Option<QuotaStatus> {
        Some(self.quota.status())
    }

    fn breaker_state(&self) -> Option<BreakerState> {
        Some(self.breaker.state())
    }
}
