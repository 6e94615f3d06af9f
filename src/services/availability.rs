//! Availability aggregation across catalogue sources.
//!
//! The aggregator owns the fallback policy: the first source (TMDB) is
//! authoritative, and a later source is consulted only for countries the
//! earlier ones left empty. Remote failures degrade to "no data for that
//! source and country"; they never abort the record. Combined records are
//! cached per (imdb id, country set).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::StreamingProviderConfig;
use crate::db::{BlacklistRepository, CacheKind, CacheRepository};
use crate::error::Error;
use crate::services::providers::canonical_provider_key;
use crate::services::source::{validate_imdb_id, AvailabilitySource, CountryOffers, Offer};

/// Aggregated availability for one series across the requested countries.
/// Constructed once per lookup, cached, and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub imdb_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmdb_id: Option<i64>,
    /// country -> provider key -> offer
    #[serde(default)]
    pub countries: BTreeMap<String, CountryOffers>,
    /// Sources that contributed, in consultation order.
    #[serde(default)]
    pub sources: Vec<String>,
    pub fetched_at: DateTime<Utc>,
    /// Why the record is empty, when it is empty for a structural reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AvailabilityRecord {
    pub fn empty(imdb_id: &str, note: Option<String>) -> Self {
        Self {
            imdb_id: imdb_id.to_string(),
            tmdb_id: None,
            countries: BTreeMap::new(),
            sources: Vec::new(),
            fetched_at: Utc::now(),
            note,
        }
    }

    fn has_offers_for(&self, country: &str) -> bool {
        self.countries.get(country).is_some_and(|m| !m.is_empty())
    }
}

/// A subscribed provider that actually carries the series.
#[derive(Debug, Clone)]
pub struct ProviderMatch {
    pub provider: String,
    pub country: String,
    pub offer: Offer,
}

pub struct AvailabilityAggregator {
    sources: Vec<Arc<dyn AvailabilitySource>>,
    cache: CacheRepository,
    blacklist: BlacklistRepository,
    aggregate_ttl: Duration,
    /// Sources whose credentials were rejected; skipped for the rest of the run.
    disabled: Mutex<HashSet<&'static str>>,
}

impl AvailabilityAggregator {
    pub fn new(
        sources: Vec<Arc<dyn AvailabilitySource>>,
        cache: CacheRepository,
        blacklist: BlacklistRepository,
        aggregate_ttl: Duration,
    ) -> Self {
        Self {
            sources,
            cache,
            blacklist,
            aggregate_ttl,
            disabled: Mutex::new(HashSet::new()),
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Answer "which providers carry this series in these countries?".
    /// Never fails: structural problems come back as an empty record with a
    /// note, and per-source failures degrade to missing data.
    pub async fn series_availability(
        &self,
        imdb_id: &str,
        countries: &[String],
    ) -> AvailabilityRecord {
        if let Err(e) = validate_imdb_id(imdb_id) {
            warn!(imdb_id, error = %e, "skipping availability lookup");
            return AvailabilityRecord::empty(imdb_id, Some(e.to_string()));
        }

        if self.blacklist.is_blacklisted(imdb_id).await {
            // Skipped silently: a blacklisted identifier is expected state,
            // not an error.
            let skip = Error::Blacklisted(imdb_id.to_string());
            debug!(imdb_id, "skipping all sources: {skip}");
            return AvailabilityRecord::empty(imdb_id, Some(skip.to_string()));
        }

        let cache_key = CacheRepository::availability_key(imdb_id, countries);
        if let Some(entry) = self.cache.get(&cache_key).await {
            match serde_json::from_value::<AvailabilityRecord>(entry.payload) {
                Ok(record) => {
                    debug!(imdb_id, "aggregate cache hit");
                    return record;
                }
                Err(e) => warn!(imdb_id, error = %e, "discarding malformed aggregate cache entry"),
            }
        }

        info!(imdb_id, countries = countries.len(), "checking availability");
        let mut record = AvailabilityRecord::empty(imdb_id, None);

        for (index, source) in self.sources.iter().enumerate() {
            if self.disabled.lock().contains(source.name()) {
                continue;
            }

            // Conservative fallback: only ask this source about countries
            // every earlier source left empty.
            let missing: Vec<&String> = countries
                .iter()
                .filter(|c| !record.has_offers_for(c.as_str()))
                .collect();
            if missing.is_empty() {
                break;
            }

            let mut contributed = false;
            for country in missing {
                match source.lookup(imdb_id, country).await {
                    Ok(offers) if !offers.is_empty() => {
                        merge_offers(&mut record, country, offers);
                        contributed = true;
                    }
                    Ok(_) => {}
                    Err(Error::NotFound) => {
                        debug!(imdb_id, source = source.name(), "series not in catalogue");
                        if index == 0 {
                            // An id the primary index has never heard of will
                            // not turn up tomorrow either.
                            self.blacklist
                                .record_failure(
                                    imdb_id,
                                    &format!("not found on {}", source.name()),
                                )
                                .await;
                        }
                        break;
                    }
                    Err(e @ Error::QuotaExceeded { .. }) => {
                        warn!(source = source.name(), "{e}; skipping source for this run");
                        break;
                    }
                    Err(Error::CircuitOpen { provider: name }) => {
                        debug!(source = name, "circuit open, skipping source");
                        break;
                    }
                    Err(e @ Error::SourceAuthFailed { .. }) => {
                        error!(source = source.name(), "{e}; disabling source for this run");
                        self.disabled.lock().insert(source.name());
                        break;
                    }
                    Err(e) => {
                        warn!(
                            imdb_id,
                            country = country.as_str(),
                            source = source.name(),
                            error = %e,
                            "source lookup failed, continuing"
                        );
                    }
                }
            }

            if contributed {
                record.sources.push(source.name().to_string());
            }
        }

        record.tmdb_id = self.cache.get_id_mapping(imdb_id).await;
        sanitise_record(&mut record);

        if let Ok(payload) = serde_json::to_value(&record) {
            self.cache
                .put(&cache_key, &payload, self.aggregate_ttl, CacheKind::ProviderData)
                .await;
        }

        record
    }
}

/// Insert a source's offers for one country, filling only the gaps of
/// providers already present. The first source to report a provider owns
/// its `source` tag and kind.
fn merge_offers(record: &mut AvailabilityRecord, country: &str, offers: CountryOffers) {
    let entry = record.countries.entry(country.to_uppercase()).or_default();
    for (key, offer) in offers {
        match entry.get_mut(&key) {
            Some(existing) => existing.absorb(&offer),
            None => {
                entry.insert(key, offer);
            }
        }
    }
}

/// Drop structurally invalid entries before the record is cached: empty
/// country codes, empty provider keys.
fn sanitise_record(record: &mut AvailabilityRecord) {
    record.countries.retain(|country, offers| {
        if country.trim().is_empty() {
            return false;
        }
        offers.retain(|key, _| !key.trim().is_empty());
        true
    });
}

/// For each country in the record: does at least one subscribed provider
/// carry the series there? Normalisation is applied to both sides.
pub fn filter_by_subscriptions(
    record: &AvailabilityRecord,
    subscriptions: &[StreamingProviderConfig],
) -> BTreeMap<String, bool> {
    let subscribed: HashSet<(String, String)> = subscriptions
        .iter()
        .map(|p| (canonical_provider_key(&p.name), p.country.to_uppercase()))
        .collect();

    record
        .countries
        .iter()
        .map(|(country, offers)| {
            let hit = offers
                .keys()
                .any(|key| subscribed.contains(&(canonical_provider_key(key), country.clone())));
            (country.clone(), hit)
        })
        .collect()
}

/// The subscribed (provider, country) pairs that actually carry the series,
/// in configuration order - the planner breaks ties by this order.
pub fn subscribed_matches(
    record: &AvailabilityRecord,
    subscriptions: &[StreamingProviderConfig],
) -> Vec<ProviderMatch> {
    let mut matches = Vec::new();
    for subscription in subscriptions {
        let key = canonical_provider_key(&subscription.name);
        let country = subscription.country.to_uppercase();
        if let Some(offer) = record.countries.get(&country).and_then(|m| m.get(&key)) {
            matches.push(ProviderMatch {
                provider: key,
                country,
                offer: offer.clone(),
            });
        }
    }
    matches
}
