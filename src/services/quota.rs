//! Caller-side request quotas with calendar-period resets.
//!
//! The daily flavour resets on the first check after midnight, the monthly
//! flavour on month rollover. The counter is incremented *before* the HTTP
//! request goes out, so an exhausted guard never costs a call.

use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaWindow {
    Daily,
    Monthly,
}

impl QuotaWindow {
    fn current_key(self) -> String {
        match self {
            Self::Daily => Local::now().format("%Y-%j").to_string(),
            Self::Monthly => Local::now().format("%Y-%m").to_string(),
        }
    }

    const fn reset_hint(self) -> &'static str {
        match self {
            Self::Daily => "resets at midnight",
            Self::Monthly => "resets on the 1st of next month",
        }
    }
}

#[derive(Debug)]
struct QuotaState {
    used: u32,
    period_key: String,
    /// Why the guard was saturated, if it was saturated externally
    /// (e.g. an HTTP 403 rather than our own counter).
    saturation_reason: Option<String>,
}

pub struct QuotaGuard {
    source: &'static str,
    window: QuotaWindow,
    ceiling: u32,
    state: Mutex<QuotaState>,
}

/// Snapshot for diagnostics output.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub window: QuotaWindow,
    pub ceiling: u32,
    pub used: u32,
    pub remaining: u32,
    pub saturation_reason: Option<String>,
}

impl QuotaGuard {
    pub fn new(source: &'static str, window: QuotaWindow, ceiling: u32) -> Self {
        Self {
            source,
            window,
            ceiling,
            state: Mutex::new(QuotaState {
                used: 0,
                period_key: window.current_key(),
                saturation_reason: None,
            }),
        }
    }

    fn roll_over_if_needed(&self, state: &mut QuotaState) {
        let key = self.window.current_key();
        if key != state.period_key {
            tracing::debug!(source = self.source, period = %key, "quota window reset");
            state.used = 0;
            state.period_key = key;
            state.saturation_reason = None;
        }
    }

    /// Claim one unit of quota, or fail with `QuotaExceeded` at the ceiling.
    pub fn check_and_increment(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        self.roll_over_if_needed(&mut state);

        if state.used >= self.ceiling {
            return Err(Error::quota_exceeded(
                self.source,
                format!("{} of {} used, {}", state.used, self.ceiling, self.window.reset_hint()),
            ));
        }

        state.used += 1;
        Ok(())
    }

    /// Saturate the counter for the rest of the period. Used when the remote
    /// signals exhaustion itself (the secondary source's HTTP 403).
    pub fn saturate(&self, reason: &str) {
        let mut state = self.state.lock();
        self.roll_over_if_needed(&mut state);
        state.used = self.ceiling;
        state.saturation_reason = Some(reason.to_string());
        tracing::warn!(source = self.source, reason, "quota saturated by remote signal");
    }

    pub fn remaining(&self) -> u32 {
        let mut state = self.state.lock();
        self.roll_over_if_needed(&mut state);
        self.ceiling.saturating_sub(state.used)
    }

    pub fn status(&self) -> QuotaStatus {
        let mut state = self.state.lock();
        self.roll_over_if_needed(&mut state);
        QuotaStatus {
            window: self.window,
            ceiling: self.ceiling,
            used: state.used,
            remaining: self.ceiling.saturating_sub(state.used),
            saturation_reason: state.saturation_reason.clone(),
        }
    }

    #[cfg(test)]
    fn force_period_key(&self, key: &str) {
        self.state.lock().period_key = key.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn increments_until_ceiling() {
        let guard = QuotaGuard::new("test", QuotaWindow::Daily, 3);

        for _ in 0..3 {
            guard.check_and_increment().unwrap();
        }
        assert_eq!(guard.remaining(), 0);

        let err = guard.check_and_increment().unwrap_err();
        assert_matches!(err, Error::QuotaExceeded { provider: "test", .. });
    }

    #[test]
    fn saturate_exhausts_immediately() {
        let guard = QuotaGuard::new("test", QuotaWindow::Daily, 100);
        guard.check_and_increment().unwrap();

        guard.saturate("HTTP 403 from remote");
        assert_eq!(guard.remaining(), 0);
        assert!(guard.check_and_increment().is_err());

        let status = guard.status();
        assert_eq!(status.saturation_reason.as_deref(), Some("HTTP 403 from remote"));
    }

    #[test]
    fn period_rollover_resets_counter() {
        let guard = QuotaGuard::new("test", QuotaWindow::Monthly, 2);
        guard.check_and_increment().unwrap();
        guard.check_and_increment().unwrap();
        assert!(guard.check_and_increment().is_err());

        // Simulate a month boundary.
        guard.force_period_key("1999-01");
        assert_eq!(guard.remaining(), 2);
        guard.check_and_increment().unwrap();
    }

    #[test]
    fn rollover_clears_saturation() {
        let guard = QuotaGuard::new("test", QuotaWindow::Daily, 5);
        guard.saturate("quota exceeded upstream");
        assert_eq!(guard.remaining(), 0);

        guard.force_period_key("1999-001");
        assert_eq!(guard.remaining(), 5);
        assert!(guard.status().saturation_reason.is_none());
    }
}
