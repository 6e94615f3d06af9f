//! External service integrations

pub mod availability;
pub mod circuit_breaker;
pub mod providers;
pub mod quota;
pub mod rate_limiter;
pub mod sonarr;
pub mod source;
pub mod streaming_availability;
pub mod tmdb;
pub mod utelly;

pub use availability::{
    filter_by_subscriptions, subscribed_matches, AvailabilityAggregator, AvailabilityRecord,
    ProviderMatch,
};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use providers::{canonical_provider_key, ProviderInfo, KNOWN_PROVIDERS};
pub use quota::{QuotaGuard, QuotaStatus, QuotaWindow};
pub use rate_limiter::{retry_async, RateLimitConfig, RateLimitedClient, RetryConfig};
pub use sonarr::{PvrClient, Season, Series, SonarrClient};
pub use source::{validate_imdb_id, AvailabilitySource, CountryOffers, Offer, OfferKind};
pub use streaming_availability::StreamingAvailabilityClient;
pub use tmdb::TmdbClient;
pub use utelly::UtellyClient;
