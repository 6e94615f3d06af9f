//! Decision making: PVR state + availability in, one decision out.
//!
//! This is the only place sync policy lives. It is pure - no I/O, no clocks -
//! so the same inputs always produce the same decision, and the executor
//! never second-guesses it.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::config::ConfiguredAction;
use crate::services::availability::ProviderMatch;
use crate::services::sonarr::Series;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    None,
    Unmonitor,
    Delete,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Unmonitor => write!(f, "unmonitor"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl From<ConfiguredAction> for SyncAction {
    fn from(action: ConfiguredAction) -> Self {
        match action {
            ConfiguredAction::Unmonitor => Self::Unmonitor,
            ConfiguredAction::Delete => Self::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionScope {
    Series,
    Seasons,
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub series_id: i64,
    pub series_title: String,
    pub action: SyncAction,
    pub scope: DecisionScope,
    pub affected_seasons: Vec<i64>,
    pub provider: Option<String>,
    pub reason: String,
}

impl Decision {
    fn none(series: &Series, reason: &str) -> Self {
        Self {
            series_id: series.id,
            series_title: series.title.clone(),
            action: SyncAction::None,
            scope: DecisionScope::Series,
            affected_seasons: Vec::new(),
            provider: None,
            reason: reason.to_string(),
        }
    }
}

fn season_list(seasons: &BTreeSet<i64>) -> String {
    seasons
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Decide what to do with one series given which subscribed providers carry
/// it. `matches` must be in configuration order; it breaks coverage ties.
pub fn plan(series: &Series, matches: &[ProviderMatch], configured: ConfiguredAction) -> Decision {
    if matches.is_empty() {
        return Decision::none(series, "not available on any configured streaming provider");
    }

    let monitored: BTreeSet<i64> = series.monitored_season_numbers().into_iter().collect();
    if monitored.is_empty() {
        return Decision::none(series, "no monitored seasons to reconcile");
    }

    // Pick the provider covering the most monitored seasons. A provider
    // without per-season data makes a series-level claim and counts as full
    // coverage; strict inequality keeps the earliest configured provider on
    // ties.
    struct Candidate<'a> {
        matched: Option<BTreeSet<i64>>,
        coverage: usize,
        provider_match: &'a ProviderMatch,
    }

    let mut best: Option<Candidate> = None;
    for provider_match in matches {
        let available: BTreeSet<i64> = provider_match.offer.seasons.iter().copied().collect();
        let (matched, coverage) = if available.is_empty() {
            (None, monitored.len())
        } else {
            let intersection: BTreeSet<i64> =
                monitored.intersection(&available).copied().collect();
            let coverage = intersection.len();
            (Some(intersection), coverage)
        };

        if coverage == 0 {
            continue;
        }
        if best.as_ref().map_or(true, |b| coverage > b.coverage) {
            best = Some(Candidate {
                matched,
                coverage,
                provider_match,
            });
        }
    }

    let Some(best) = best else {
        return Decision::none(
            series,
            "no monitored seasons available on any configured streaming provider",
        );
    };

    let provider = best.provider_match.provider.clone();
    let action = SyncAction::from(configured);

    match best.matched {
        // Per-season data absent on the provider side: series-level decision.
        None => Decision {
            series_id: series.id,
            series_title: series.title.clone(),
            action,
            scope: DecisionScope::Series,
            affected_seasons: monitored.iter().copied().collect(),
            provider: Some(provider.clone()),
            reason: format!("available on {provider}"),
        },
        Some(matched) if matched == monitored => Decision {
            series_id: series.id,
            series_title: series.title.clone(),
            action,
            scope: DecisionScope::Series,
            affected_seasons: monitored.iter().copied().collect(),
            provider: Some(provider.clone()),
            reason: format!("all monitored seasons available on {provider}"),
        },
        Some(matched) => {
            // Partial availability never deletes files.
            let action = match action {
                SyncAction::Delete => SyncAction::Unmonitor,
                other => other,
            };
            Decision {
                series_id: series.id,
                series_title: series.title.clone(),
                action,
                scope: DecisionScope::Seasons,
                affected_seasons: matched.iter().copied().collect(),
                provider: Some(provider.clone()),
                reason: format!("seasons {} available on {provider}", season_list(&matched)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::source::{Offer, OfferKind};
    use pretty_assertions::assert_eq;

    fn series(monitored_seasons: &[i64]) -> Series {
        serde_json::from_value(serde_json::json!({
            "id": 1,
            "title": "Breaking Bad",
            "monitored": true,
            "imdbId": "tt0903747",
            "seasons": monitored_seasons
                .iter()
                .map(|n| serde_json::json!({"seasonNumber": n, "monitored": true}))
                .collect::<Vec<_>>()
        }))
        .unwrap()
    }

    fn provider_match(provider: &str, seasons: &[i64]) -> ProviderMatch {
        ProviderMatch {
            provider: provider.to_string(),
            country: "US".to_string(),
            offer: Offer {
                kind: OfferKind::Subscription,
                link: None,
                quality: None,
                expires_at: None,
                seasons: seasons.to_vec(),
                source: "tmdb".to_string(),
            },
        }
    }

    #[test]
    fn no_match_means_no_action() {
        let decision = plan(&series(&[1, 2]), &[], ConfiguredAction::Unmonitor);
        assert_eq!(decision.action, SyncAction::None);
        assert_eq!(decision.reason, "not available on any configured streaming provider");
        assert!(decision.affected_seasons.is_empty());
    }

    #[test]
    fn full_coverage_is_series_scope() {
        let matches = vec![provider_match("netflix", &[1, 2, 3])];
        let decision = plan(&series(&[1, 2]), &matches, ConfiguredAction::Unmonitor);

        assert_eq!(decision.action, SyncAction::Unmonitor);
        assert_eq!(decision.scope, DecisionScope::Series);
        assert_eq!(decision.affected_seasons, vec![1, 2]);
        assert_eq!(decision.provider.as_deref(), Some("netflix"));
        assert_eq!(decision.reason, "all monitored seasons available on netflix");
    }

    #[test]
    fn partial_coverage_is_season_scope() {
        let matches = vec![provider_match("netflix", &[1, 2])];
        let decision = plan(&series(&[1, 2, 3]), &matches, ConfiguredAction::Unmonitor);

        assert_eq!(decision.scope, DecisionScope::Seasons);
        assert_eq!(decision.affected_seasons, vec![1, 2]);
        assert_eq!(decision.reason, "seasons 1, 2 available on netflix");
    }

    #[test]
    fn partial_coverage_downgrades_delete() {
        let matches = vec![provider_match("netflix", &[1, 2])];
        let decision = plan(&series(&[1, 2, 3]), &matches, ConfiguredAction::Delete);

        // Partial availability must never delete files.
        assert_eq!(decision.action, SyncAction::Unmonitor);
        assert_eq!(decision.scope, DecisionScope::Seasons);
    }

    #[test]
    fn full_coverage_keeps_delete() {
        let matches = vec![provider_match("netflix", &[1, 2, 3])];
        let decision = plan(&series(&[1, 2, 3]), &matches, ConfiguredAction::Delete);
        assert_eq!(decision.action, SyncAction::Delete);
        assert_eq!(decision.scope, DecisionScope::Series);
    }

    #[test]
    fn missing_season_data_degrades_to_series_level() {
        let matches = vec![provider_match("netflix", &[])];
        let decision = plan(&series(&[1, 2]), &matches, ConfiguredAction::Unmonitor);

        assert_eq!(decision.scope, DecisionScope::Series);
        assert_eq!(decision.affected_seasons, vec![1, 2]);
        assert_eq!(decision.reason, "available on netflix");
    }

    #[test]
    fn disjoint_seasons_mean_no_action() {
        let matches = vec![provider_match("netflix", &[4, 5])];
        let decision = plan(&series(&[1, 2]), &matches, ConfiguredAction::Unmonitor);
        assert_eq!(decision.action, SyncAction::None);
    }

    #[test]
    fn best_provider_wins_and_config_order_breaks_ties() {
        let matches = vec![
            provider_match("hulu", &[1]),
            provider_match("netflix", &[1, 2]),
        ];
        let decision = plan(&series(&[1, 2]), &matches, ConfiguredAction::Unmonitor);
        assert_eq!(decision.provider.as_deref(), Some("netflix"));

        // Equal coverage: the earlier configured provider is kept.
        let matches = vec![
            provider_match("hulu", &[1, 2]),
            provider_match("netflix", &[1, 2]),
        ];
        let decision = plan(&series(&[1, 2]), &matches, ConfiguredAction::Unmonitor);
        assert_eq!(decision.provider.as_deref(), Some("hulu"));
    }

    #[test]
    fn no_monitored_seasons_is_nothing_to_do() {
        let matches = vec![provider_match("netflix", &[1])];
        let decision = plan(&series(&[]), &matches, ConfiguredAction::Unmonitor);
        assert_eq!(decision.action, SyncAction::None);
        assert_eq!(decision.reason, "no monitored seasons to reconcile");
    }

    #[test]
    fn season_zero_never_participates() {
        let mut s = series(&[1]);
        s.seasons.push(crate::services::sonarr::Season {
            season_number: 0,
            monitored: true,
        });
        let matches = vec![provider_match("netflix", &[0, 1])];
        let decision = plan(&s, &matches, ConfiguredAction::Unmonitor);

        assert_eq!(decision.scope, DecisionScope::Series);
        assert_eq!(decision.affected_seasons, vec![1]);
    }

    #[test]
    fn planning_is_referentially_transparent() {
        let matches = vec![provider_match("netflix", &[1, 2])];
        let s = series(&[1, 2, 3]);
        let first = plan(&s, &matches, ConfiguredAction::Delete);
        let second = plan(&s, &matches, ConfiguredAction::Delete);

        assert_eq!(first.action, second.action);
        assert_eq!(first.scope, second.scope);
        assert_eq!(first.affected_seasons, second.affected_seasons);
        assert_eq!(first.reason, second.reason);
    }
}
