//! Integration tests for the reconciliation policy
//!
//! These tests pin down the documented decision rules:
//! - which (monitored, available) season combinations produce which action
//! - the partial-availability delete downgrade
//! - scope selection (whole series vs individual seasons)

use std::collections::BTreeSet;

/// Actions the sync engine can decide on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    None,
    Unmonitor,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Series,
    Seasons,
}

/// The decision table as documented: monitored seasons, seasons a provider
/// reports, and the configured action map to an (action, scope) pair.
/// An empty `available` set models a provider without per-season data
/// (a series-level claim).
fn decide(
    monitored: &[i64],
    available: Option<&[i64]>,
    configured_delete: bool,
) -> (Action, Scope, Vec<i64>) {
    let monitored: BTreeSet<i64> = monitored.iter().copied().filter(|&n| n != 0).collect();
    if monitored.is_empty() {
        return (Action::None, Scope::Series, vec![]);
    }

    let configured = if configured_delete {
        Action::Delete
    } else {
        Action::Unmonitor
    };

    let Some(available) = available else {
        return (Action::None, Scope::Series, vec![]);
    };

    // No per-season data: the provider claims the series as a whole.
    if available.is_empty() {
        return (configured, Scope::Series, monitored.iter().copied().collect());
    }

    let available: BTreeSet<i64> = available.iter().copied().collect();
    let matched: Vec<i64> = monitored.intersection(&available).copied().collect();

    if matched.is_empty() {
        (Action::None, Scope::Series, vec![])
    } else if matched.len() == monitored.len() {
        (configured, Scope::Series, matched)
    } else {
        // Partial availability never deletes files.
        (Action::Unmonitor, Scope::Seasons, matched)
    }
}

// ============================================================================
// Full availability
// ============================================================================

#[test]
fn test_full_availability_unmonitors_series() {
    let (action, scope, seasons) = decide(&[1, 2], Some(&[1, 2, 3]), false);
    assert_eq!(action, Action::Unmonitor);
    assert_eq!(scope, Scope::Series);
    assert_eq!(seasons, vec![1, 2]);
}

#[test]
fn test_full_availability_respects_delete() {
    let (action, scope, _) = decide(&[1, 2], Some(&[1, 2]), true);
    assert_eq!(action, Action::Delete);
    assert_eq!(scope, Scope::Series);
}

// ============================================================================
// Partial availability
// ============================================================================

#[test]
fn test_partial_availability_is_season_scoped() {
    let (action, scope, seasons) = decide(&[1, 2, 3], Some(&[1, 2]), false);
    assert_eq!(action, Action::Unmonitor);
    assert_eq!(scope, Scope::Seasons);
    assert_eq!(seasons, vec![1, 2]);
}

#[test]
fn test_partial_availability_never_deletes() {
    // The critical safety rule: a delete configuration downgrades when only
    // some monitored seasons are streamable.
    let (action, scope, seasons) = decide(&[1, 2, 3], Some(&[1, 2]), true);
    assert_eq!(action, Action::Unmonitor);
    assert_eq!(scope, Scope::Seasons);
    assert_eq!(seasons, vec![1, 2]);
}

#[test]
fn test_affected_seasons_always_subset_of_monitored() {
    for available in [&[1][..], &[1, 2], &[2, 9], &[4, 5, 6], &[]] {
        let (_, _, seasons) = decide(&[1, 2, 3], Some(available), true);
        for season in seasons {
            assert!((1..=3).contains(&season));
        }
    }
}

// ============================================================================
// No availability
// ============================================================================

#[test]
fn test_no_provider_means_no_action() {
    let (action, _, seasons) = decide(&[1, 2], None, false);
    assert_eq!(action, Action::None);
    assert!(seasons.is_empty());
}

#[test]
fn test_disjoint_seasons_mean_no_action() {
    let (action, _, _) = decide(&[1, 2], Some(&[5, 6]), true);
    assert_eq!(action, Action::None);
}

// ============================================================================
// Degenerate inputs
// ============================================================================

#[test]
fn test_series_level_claim_covers_all_monitored() {
    let (action, scope, seasons) = decide(&[2, 4], Some(&[]), false);
    assert_eq!(action, Action::Unmonitor);
    assert_eq!(scope, Scope::Series);
    assert_eq!(seasons, vec![2, 4]);
}

#[test]
fn test_specials_never_participate() {
    let (action, _, seasons) = decide(&[0, 1], Some(&[0, 1]), false);
    assert_eq!(action, Action::Unmonitor);
    assert_eq!(seasons, vec![1]);

    let (action, _, _) = decide(&[0], Some(&[0]), false);
    assert_eq!(action, Action::None);
}

#[test]
fn test_no_monitored_seasons_is_nothing_to_do() {
    let (action, _, _) = decide(&[], Some(&[1, 2]), true);
    assert_eq!(action, Action::None);
}

#[test]
fn test_decision_is_deterministic() {
    for _ in 0..3 {
        assert_eq!(
            decide(&[1, 2, 3], Some(&[2, 3]), true),
            (Action::Unmonitor, Scope::Seasons, vec![2, 3])
        );
    }
}
