//! Unified error type for the sync engine and its collaborators.
//!
//! `NotFound` is a normal outcome for catalogue lookups, not a failure;
//! callers match on it explicitly. Only configuration validation and an
//! unreachable PVR abort a run — everything else degrades.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration value; surfaced to the caller before any work.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// PVR transport failed after retries. Aborts the run.
    #[error("PVR unreachable: {0}")]
    PvrUnreachable(String),

    /// PVR returned an error status for a specific operation.
    #[error("PVR rejected {operation}: {message}")]
    PvrRejected { operation: String, message: String },

    /// Remote catalogue rejected the configured credentials.
    #[error("{provider} authentication failed - check your API key")]
    SourceAuthFailed { provider: &'static str },

    /// HTTP 429 from a catalogue source.
    #[error("{provider} rate limit exceeded")]
    SourceRateLimited { provider: &'static str },

    /// Caller-side quota guard tripped; no request was issued.
    #[error("{provider} quota exhausted: {detail}")]
    QuotaExceeded {
        provider: &'static str,
        detail: String,
    },

    /// Circuit breaker rejected the call without issuing a request.
    #[error("{provider} circuit breaker is open")]
    CircuitOpen { provider: &'static str },

    /// Remote returned 404 for a lookup. Recorded as "no data".
    #[error("not found")]
    NotFound,

    /// 5xx from a remote; retried internally, surfaced on exhaustion.
    #[error("{provider} transient error (HTTP {status})")]
    Transient { provider: &'static str, status: u16 },

    /// Backing-store error. Always logged and degraded to a cache miss.
    #[error("cache error: {0}")]
    Cache(String),

    /// Identifier has a recorded failure history; skipped silently.
    #[error("identifier {0} is blacklisted")]
    Blacklisted(String),

    /// Identifier failed validation before any network use.
    #[error("invalid IMDb id '{0}' - expected 'tt' followed by 7-8 digits")]
    InvalidImdbId(String),

    /// Transport-level failure talking to a catalogue source.
    #[error("{provider} request failed: {message}")]
    Request {
        provider: &'static str,
        message: String,
    },
}

impl Error {
    pub fn pvr_rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PvrRejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn quota_exceeded(provider: &'static str, detail: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            provider,
            detail: detail.into(),
        }
    }

    pub fn request(provider: &'static str, err: &reqwest::Error) -> Self {
        Self::Request {
            provider,
            message: err.to_string(),
        }
    }

    /// Whether the retry helper should attempt this operation again.
    /// Only transient upstream failures qualify.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
