//! Decision execution against the PVR.
//!
//! The executor applies exactly what the planner decided: dry-run mode only
//! narrates, season batches run in ascending order with partial-success
//! semantics, and season-scoped deletion unmonitors first so a failed file
//! deletion can never cause a re-download.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::services::sonarr::PvrClient;
use crate::sync::planner::{Decision, DecisionScope, SyncAction};

/// Outcome of executing one decision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub series_id: i64,
    pub series_title: String,
    pub action_taken: SyncAction,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    pub fn failure(decision: &Decision, message: String, error: String) -> Self {
        Self {
            series_id: decision.series_id,
            series_title: decision.series_title.clone(),
            action_taken: decision.action,
            success: false,
            message,
            provider: decision.provider.clone(),
            error: Some(error),
        }
    }

    fn success(decision: &Decision, message: String) -> Self {
        Self {
            series_id: decision.series_id,
            series_title: decision.series_title.clone(),
            action_taken: decision.action,
            success: true,
            message,
            provider: decision.provider.clone(),
            error: None,
        }
    }
}

fn season_list(seasons: &[i64]) -> String {
    seasons
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct SyncExecutor {
    pvr: Arc<dyn PvrClient>,
    dry_run: bool,
}

impl SyncExecutor {
    pub fn new(pvr: Arc<dyn PvrClient>, dry_run: bool) -> Self {
        Self { pvr, dry_run }
    }

    /// Apply one decision. Never panics and never propagates PVR errors;
    /// they land in the returned result.
    pub async fn execute(&self, decision: &Decision) -> SyncResult {
        if decision.action == SyncAction::None {
            return SyncResult::success(decision, decision.reason.clone());
        }

        if self.dry_run {
            let message = self.dry_run_message(decision);
            info!("DRY RUN: {message}");
            return SyncResult::success(decision, message);
        }

        match (decision.action, decision.scope) {
            (SyncAction::Unmonitor, DecisionScope::Series) => self.unmonitor_series(decision).await,
            (SyncAction::Unmonitor, DecisionScope::Seasons) => self.unmonitor_seasons(decision).await,
            (SyncAction::Delete, DecisionScope::Series) => self.delete_series(decision).await,
            (SyncAction::Delete, DecisionScope::Seasons) => self.delete_seasons(decision).await,
            (SyncAction::None, _) => unreachable!("handled above"),
        }
    }

    fn dry_run_message(&self, decision: &Decision) -> String {
        let title = &decision.series_title;
        let reason = &decision.reason;
        match (decision.action, decision.scope) {
            (SyncAction::Unmonitor, DecisionScope::Series) => {
                format!("would unmonitor series '{title}' ({reason})")
            }
            (SyncAction::Unmonitor, DecisionScope::Seasons) => format!(
                "would unmonitor seasons {} of '{title}' ({reason})",
                season_list(&decision.affected_seasons)
            ),
            (SyncAction::Delete, DecisionScope::Series) => {
                format!("would delete series '{title}' ({reason})")
            }
            (SyncAction::Delete, DecisionScope::Seasons) => format!(
                "would unmonitor and delete seasons {} of '{title}' ({reason})",
                season_list(&decision.affected_seasons)
            ),
            (SyncAction::None, _) => reason.clone(),
        }
    }

    async fn unmonitor_series(&self, decision: &Decision) -> SyncResult {
        match self.pvr.unmonitor_series(decision.series_id).await {
            Ok(()) => {
                let message = format!(
                    "unmonitored series '{}' ({})",
                    decision.series_title, decision.reason
                );
                info!("{message}");
                SyncResult::success(decision, message)
            }
            Err(e) => {
                error!(series_id = decision.series_id, error = %e, "unmonitor failed");
                SyncResult::failure(
                    decision,
                    format!("failed to unmonitor series '{}'", decision.series_title),
                    e.to_string(),
                )
            }
        }
    }

    async fn unmonitor_seasons(&self, decision: &Decision) -> SyncResult {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut errors = Vec::new();

        // Ascending order keeps logs deterministic and retries predictable.
        for &season in &decision.affected_seasons {
            match self.pvr.unmonitor_season(decision.series_id, season).await {
                Ok(()) => succeeded.push(season),
                Err(e) => {
                    error!(
                        series_id = decision.series_id,
                        season,
                        error = %e,
                        "season unmonitor failed"
                    );
                    failed.push(season);
                    errors.push(format!("season {season}: {e}"));
                }
            }
        }

        if succeeded.is_empty() {
            return SyncResult::failure(
                decision,
                format!(
                    "failed to unmonitor seasons {} of '{}'",
                    season_list(&decision.affected_seasons),
                    decision.series_title
                ),
                errors.join("; "),
            );
        }

        let mut message = format!(
            "unmonitored seasons {} of '{}' ({})",
            season_list(&succeeded),
            decision.series_title,
            decision.reason
        );
        if !failed.is_empty() {
            message.push_str(&format!("; seasons {} failed", season_list(&failed)));
        }
        info!("{message}");

        SyncResult {
            error: (!errors.is_empty()).then(|| errors.join("; ")),
            ..SyncResult::success(decision, message)
        }
    }

    async fn delete_series(&self, decision: &Decision) -> SyncResult {
        // Whole-series delete removes files; partial availability never
        // reaches this path (the planner downgrades it).
        match self.pvr.delete_series(decision.series_id, true).await {
            Ok(()) => {
                let message = format!(
                    "deleted series '{}' ({})",
                    decision.series_title, decision.reason
                );
                info!("{message}");
                SyncResult::success(decision, message)
            }
            Err(e) => {
                error!(series_id = decision.series_id, error = %e, "delete failed");
                SyncResult::failure(
                    decision,
                    format!("failed to delete series '{}'", decision.series_title),
                    e.to_string(),
                )
            }
        }
    }

    async fn delete_seasons(&self, decision: &Decision) -> SyncResult {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut errors = Vec::new();
        let mut files_kept = Vec::new();

        for &season in &decision.affected_seasons {
            match self
                .pvr
                .unmonitor_and_delete_season(decision.series_id, season)
                .await
            {
                Ok(removal) => {
                    succeeded.push(season);
                    if !removal.files_deleted {
                        files_kept.push(season);
                        if let Some(detail) = removal.detail {
                            errors.push(format!("season {season} files: {detail}"));
                        }
                    }
                }
                Err(e) => {
                    // Unmonitoring failed, so the season was skipped entirely.
                    error!(
                        series_id = decision.series_id,
                        season,
                        error = %e,
                        "season unmonitor failed, skipping its file deletion"
                    );
                    failed.push(season);
                    errors.push(format!("season {season}: {e}"));
                }
            }
        }

        if succeeded.is_empty() {
            return SyncResult::failure(
                decision,
                format!(
                    "failed to remove seasons {} of '{}'",
                    season_list(&decision.affected_seasons),
                    decision.series_title
                ),
                errors.join("; "),
            );
        }

        let mut message = format!(
            "unmonitored and deleted seasons {} of '{}' ({})",
            season_list(&succeeded),
            decision.series_title,
            decision.reason
        );
        if !files_kept.is_empty() {
            message.push_str(&format!(
                "; file deletion incomplete for seasons {}",
                season_list(&files_kept)
            ));
        }
        if !failed.is_empty() {
            message.push_str(&format!("; seasons {} failed", season_list(&failed)));
        }
        info!("{message}");

        SyncResult {
            error: (!errors.is_empty()).then(|| errors.join("; ")),
            ..SyncResult::success(decision, message)
        }
    }
}
