//! Circuit breaker guarding one remote catalogue source.
//!
//! Closed -> Open after `failure_threshold` consecutive failures; Open ->
//! HalfOpen once `recovery_timeout` has elapsed since the last failure; a
//! HalfOpen success closes the breaker, a HalfOpen failure re-opens it and
//! restarts the timer. One instance per source, shared by all callers.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

pub struct CircuitBreaker {
    source: &'static str,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(source: &'static str, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            source,
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Default tunables: 3 failures, 60 second recovery.
    pub fn with_defaults(source: &'static str) -> Self {
        Self::new(source, 3, Duration::from_secs(60))
    }

    /// Whether a call may be attempted right now. Transitions Open ->
    /// HalfOpen when the recovery timeout has elapsed.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let recovered = inner
                    .last_failure_at
                    .is_some_and(|at| at.elapsed() > self.recovery_timeout);
                if recovered {
                    tracing::info!(source = self.source, "circuit breaker entering half-open state");
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            tracing::info!(source = self.source, "circuit breaker reset after successful call");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        if inner.state == BreakerState::HalfOpen || inner.failure_count >= self.failure_threshold {
            if inner.state != BreakerState::Open {
                tracing::warn!(
                    source = self.source,
                    failures = inner.failure_count,
                    "circuit breaker opened"
                );
            }
            inner.state = BreakerState::Open;
        }
    }

    /// Run `operation` under breaker protection. Fails with `CircuitOpen`
    /// without invoking the operation when the breaker rejects the call.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if !self.can_attempt() {
            return Err(Error::CircuitOpen {
                provider: self.source,
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_attempt());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_attempt());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);

        // The count starts over; two more failures don't open it.
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_recovery_timeout() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(20));

        breaker.record_failure();
        assert!(!breaker.can_attempt());

        std::thread::sleep(Duration::from_millis(40));
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(10));

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.can_attempt());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_millis(10));

        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_attempt());
    }

    #[tokio::test]
    async fn call_rejects_without_invoking_when_open() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_secs(60));
        breaker.record_failure();

        let mut invoked = false;
        let result: Result<(), Error> = breaker
            .call(|| {
                invoked = true;
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn call_records_outcomes() {
        let breaker = CircuitBreaker::new("test", 2, Duration::from_secs(60));

        let _: Result<(), Error> = breaker.call(|| async { Err(Error::NotFound) }).await;
        assert_eq!(breaker.failure_count(), 1);

        let ok: Result<u8, Error> = breaker.call(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(breaker.failure_count(), 0);
    }
}
