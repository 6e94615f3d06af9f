//! The common capability implemented by every catalogue source.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::services::circuit_breaker::BreakerState;
use crate::services::quota::QuotaStatus;

/// How a provider monetises a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferKind {
    Subscription,
    Rent,
    Buy,
    Free,
    Ads,
}

/// One provider's offer for a series in one country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub kind: OfferKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Season numbers the source reports as available; empty means the
    /// source only speaks at series level.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seasons: Vec<i64>,
    /// Which source first reported this offer.
    pub source: String,
}

impl Offer {
    #[allow(dead_code)]
    pub fn subscription(source: &str) -> Self {
        Self {
            kind: OfferKind::Subscription,
            link: None,
            quality: None,
            expires_at: None,
            seasons: Vec::new(),
            source: source.to_string(),
        }
    }

    /// Fill this offer's empty detail fields from a later source's sighting.
    /// The kind and the original `source` tag are never overridden.
    pub fn absorb(&mut self, other: &Offer) {
        if self.link.is_none() {
            self.link = other.link.clone();
        }
        if self.quality.is_none() {
            self.quality = other.quality.clone();
        }
        if self.expires_at.is_none() {
            self.expires_at = other.expires_at;
        }
        if self.seasons.is_empty() {
            self.seasons = other.seasons.clone();
        }
    }
}

/// Offers keyed by canonical provider key.
pub type CountryOffers = BTreeMap<String, Offer>;

static IMDB_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^tt\d{7,8}$").expect("valid regex"));

/// Validate an IMDb title id before it goes anywhere near the network.
pub fn validate_imdb_id(imdb_id: &str) -> Result<(), Error> {
    if IMDB_ID_RE.is_match(imdb_id) {
        Ok(())
    } else {
        Err(Error::InvalidImdbId(imdb_id.to_string()))
    }
}

/// A remote catalogue that can answer "which providers carry this series in
/// this country?". One implementation per upstream API; the aggregator only
/// ever sees this trait.
#[async_trait]
pub trait AvailabilitySource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Look up offers for `imdb_id` in `country` (uppercase ISO-3166-1).
    /// `NotFound` means the catalogue has no record of the title; an empty
    /// map means it knows the title but lists no providers there.
    async fn lookup(&self, imdb_id: &str, country: &str) -> Result<CountryOffers, Error>;

    /// Remaining caller-side quota, for sources that have one.
    fn quota_status(&self) -> Option<QuotaStatus> {
        None
    }

    /// Circuit-breaker state, for diagnostics.
    fn breaker_state(&self) -> Option<BreakerState> {
        None
    }
}
