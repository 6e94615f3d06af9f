//! The sync engine: ties the PVR, the availability aggregator, the planner
//! and the executor together.

pub mod executor;
pub mod planner;

pub use executor::{SyncExecutor, SyncResult};
pub use planner::{Decision, DecisionScope, SyncAction};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::CacheRepository;
use crate::error::Error;
use crate::services::availability::{
    filter_by_subscriptions, subscribed_matches, AvailabilityAggregator,
};
use crate::services::sonarr::{PvrClient, Series};

/// Progress callback: (current, total, series title).
pub type ProgressFn = dyn Fn(usize, usize, &str) + Send + Sync;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub actions: BTreeMap<String, usize>,
    pub providers: BTreeMap<String, usize>,
}

/// Fold results into the counts callers render.
pub fn summarize(results: &[SyncResult]) -> SyncSummary {
    let mut actions: BTreeMap<String, usize> = BTreeMap::new();
    let mut providers: BTreeMap<String, usize> = BTreeMap::new();

    for result in results {
        *actions.entry(result.action_taken.to_string()).or_default() += 1;
        if let Some(provider) = &result.provider {
            *providers.entry(provider.clone()).or_default() += 1;
        }
    }

    SyncSummary {
        total_processed: results.len(),
        successful: results.iter().filter(|r| r.success).count(),
        failed: results.iter().filter(|r| !r.success).count(),
        actions,
        providers,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PvrStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatorStatus {
    pub initialized: bool,
    pub sources: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityReport {
    pub pvr: PvrStatus,
    pub aggregator: AggregatorStatus,
    pub cache: CacheStatus,
}

pub struct SyncEngine {
    config: Arc<Config>,
    pvr: Arc<dyn PvrClient>,
    aggregator: Arc<AvailabilityAggregator>,
    cache: CacheRepository,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        config: Arc<Config>,
        pvr: Arc<dyn PvrClient>,
        aggregator: Arc<AvailabilityAggregator>,
        cache: CacheRepository,
    ) -> Self {
        Self {
            config,
            pvr,
            aggregator,
            cache,
            cancel: CancellationToken::new(),
        }
    }

    /// Token callers can use to abort the run; results collected so far are
    /// still returned.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a full sync pass. Only pre-flight failures (listing the library)
    /// abort; per-series problems become failed results.
    pub async fn run_sync(&self, progress: Option<&ProgressFn>) -> Result<Vec<SyncResult>, Error> {
        info!(dry_run = self.config.sync.dry_run, "starting sync");
        let started = std::time::Instant::now();

        let eligible = self.eligible_series().await?;
        info!(count = eligible.len(), "eligible series");

        let executor = SyncExecutor::new(self.pvr.clone(), self.config.sync.dry_run);
        let total = eligible.len();
        let mut results = Vec::with_capacity(total);

        for (index, series) in eligible.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(
                    processed = results.len(),
                    total, "sync cancelled, returning partial results"
                );
                break;
            }
            if let Some(callback) = progress {
                callback(index + 1, total, &series.title);
            }

            let result = self.process_series(series, &executor).await;
            results.push(result);
        }

        let summary = summarize(&results);
        info!(
            successful = summary.successful,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync complete"
        );
        Ok(results)
    }

    /// Monitored series that are old enough to reconcile. A series added
    /// within `exclude_recent_days` is left alone; an unparseable added
    /// date is logged and treated as not recent.
    async fn eligible_series(&self) -> Result<Vec<Series>, Error> {
        let all = self.pvr.list_monitored_series().await?;
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.config.sync.exclude_recent_days));

        let mut eligible = Vec::new();
        for series in all {
            if !series.monitored {
                continue;
            }
            match series.added_at() {
                Some(added) if added > cutoff => {
                    debug!(title = %series.title, "skipping recently added series");
                    continue;
                }
                Some(_) => {}
                None => {
                    if series.added.is_some() {
                        warn!(
                            title = %series.title,
                            "could not parse added date, treating as not recent"
                        );
                    }
                }
            }
            eligible.push(series);
        }

        Ok(eligible)
    }

    async fn process_series(&self, series: &Series, executor: &SyncExecutor) -> SyncResult {
        debug!(title = %series.title, "processing series");

        let Some(imdb_id) = series.imdb_id.as_deref() else {
            return SyncResult {
                series_id: series.id,
                series_title: series.title.clone(),
                action_taken: SyncAction::None,
                success: true,
                message: "series has no IMDb id; availability unknown".to_string(),
                provider: None,
                error: None,
            };
        };

        let countries = self.config.countries();
        let record = self.aggregator.series_availability(imdb_id, &countries).await;

        let by_country = filter_by_subscriptions(&record, &self.config.streaming_providers);
        debug!(title = %series.title, availability = ?by_country, "subscription coverage");

        let matches = subscribed_matches(&record, &self.config.streaming_providers);

        let decision = planner::plan(series, &matches, self.config.sync.action);
        info!(title = %series.title, decision = %decision.reason, "planned");

        executor.execute(&decision).await
    }

    /// Structured diagnosis of every external dependency. Never fails.
    pub async fn test_connectivity(&self) -> ConnectivityReport {
        let pvr = match self.pvr.test_connection().await {
            Ok(()) => PvrStatus {
                connected: true,
                error: None,
            },
            Err(e) => PvrStatus {
                connected: false,
                error: Some(e.to_string()),
            },
        };

        let sources = self.aggregator.source_count();
        let aggregator = AggregatorStatus {
            initialized: sources > 0,
            sources,
            error: (sources == 0).then(|| "no catalogue sources enabled".to_string()),
        };

        // The cache degrades internally; reachable statistics mean the
        // backing store is usable.
        let stats = self.cache.statistics().await;
        let cache = CacheStatus {
            initialized: true,
            error: None,
        };
        debug!(
            hits = stats.hit_count,
            misses = stats.miss_count,
            "cache statistics at connectivity check"
        );

        ConnectivityReport {
            pvr,
            aggregator,
            cache,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CacheConfig, ConfiguredAction, ProviderApisConfig, SonarrConfig,
        StreamingAvailabilityConfig, StreamingProviderConfig, SyncConfig, TmdbConfig, UtellyConfig,
    };
    use crate::db::Database;
    use crate::error::Error;
    use crate::services::source::{AvailabilitySource, CountryOffers, Offer};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    fn result(action: SyncAction, success: bool, provider: Option<&str>) -> SyncResult {
        SyncResult {
            series_id: 1,
            series_title: "T".to_string(),
            action_taken: action,
            success,
            message: String::new(),
            provider: provider.map(String::from),
            error: None,
        }
    }

    #[test]
    fn summary_counts_actions_and_providers() {
        let results = vec![
            result(SyncAction::Unmonitor, true, Some("netflix")),
            result(SyncAction::Unmonitor, true, Some("netflix")),
            result(SyncAction::None, true, None),
            result(SyncAction::Delete, false, Some("hulu")),
        ];

        let summary = summarize(&results);
        assert_eq!(summary.total_processed, 4);
        assert_eq!(summary.successful, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.actions["unmonitor"], 2);
        assert_eq!(summary.actions["none"], 1);
        assert_eq!(summary.actions["delete"], 1);
        assert_eq!(summary.providers["netflix"], 2);
        assert_eq!(summary.providers["hulu"], 1);
    }

    #[test]
    fn summary_of_empty_run() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_processed, 0);
        assert!(summary.actions.is_empty());
        assert!(summary.providers.is_empty());
    }

    // ------------------------------------------------------------------
    // End-to-end engine scenarios with mocked PVR and catalogue source
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MockPvr {
        library: Vec<Series>,
        mutations: Mutex<Vec<String>>,
    }

    impl MockPvr {
        fn with_library(library: Vec<Series>) -> Arc<Self> {
            Arc::new(Self {
                library,
                mutations: Mutex::new(Vec::new()),
            })
        }

        fn mutations(&self) -> Vec<String> {
            self.mutations.lock().clone()
        }
    }

    #[async_trait]
    impl PvrClient for MockPvr {
        async fn test_connection(&self) -> Result<(), Error> {
            Ok(())
        }

        async fn list_monitored_series(&self) -> Result<Vec<Series>, Error> {
            Ok(self.library.iter().filter(|s| s.monitored).cloned().collect())
        }

        async fn series(&self, id: i64) -> Result<Series, Error> {
            self.library
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or(Error::NotFound)
        }

        async fn unmonitor_series(&self, id: i64) -> Result<(), Error> {
            self.mutations.lock().push(format!("unmonitor_series({id})"));
            Ok(())
        }

        async fn unmonitor_season(&self, id: i64, season: i64) -> Result<(), Error> {
            self.mutations
                .lock()
                .push(format!("unmonitor_season({id}, {season})"));
            Ok(())
        }

        async fn delete_series(&self, id: i64, delete_files: bool) -> Result<(), Error> {
            self.mutations
                .lock()
                .push(format!("delete_series({id}, {delete_files})"));
            Ok(())
        }

        async fn delete_season_files(&self, id: i64, season: i64) -> Result<(), Error> {
            self.mutations
                .lock()
                .push(format!("delete_season_files({id}, {season})"));
            Ok(())
        }
    }

    struct StubSource {
        offers_by_imdb: HashMap<String, CountryOffers>,
    }

    #[async_trait]
    impl AvailabilitySource for StubSource {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn lookup(&self, imdb_id: &str, _country: &str) -> Result<CountryOffers, Error> {
            Ok(self.offers_by_imdb.get(imdb_id).cloned().unwrap_or_default())
        }
    }

    fn test_config(action: ConfiguredAction, dry_run: bool) -> Config {
        Config {
            sonarr: SonarrConfig {
                url: "http://localhost:8989".to_string(),
                api_key: "abcdefghijklmnopqrstuvwxyz123456".to_string(),
            },
            provider_apis: ProviderApisConfig {
                tmdb: TmdbConfig {
                    api_key: "key".to_string(),
                    enabled: true,
                    rate_limit: 40,
                    cache_ttl: 86_400,
                },
                streaming_availability: StreamingAvailabilityConfig::default(),
                utelly: UtellyConfig::default(),
            },
            streaming_providers: vec![StreamingProviderConfig {
                name: "netflix".to_string(),
                country: "US".to_string(),
            }],
            sync: SyncConfig {
                action,
                dry_run,
                exclude_recent_days: 7,
            },
            cache: CacheConfig::default(),
        }
    }

    fn breaking_bad(added: &str, seasons: &[i64]) -> Series {
        serde_json::from_value(serde_json::json!({
            "id": 1,
            "title": "Breaking Bad",
            "monitored": true,
            "added": added,
            "imdbId": "tt0903747",
            "seasons": seasons
                .iter()
                .map(|n| serde_json::json!({"seasonNumber": n, "monitored": true}))
                .collect::<Vec<_>>()
        }))
        .unwrap()
    }

    fn netflix_offer(seasons: &[i64]) -> CountryOffers {
        let mut offer = Offer::subscription("stub");
        offer.seasons = seasons.to_vec();
        CountryOffers::from([("netflix".to_string(), offer)])
    }

    async fn engine_with(
        config: Config,
        pvr: Arc<MockPvr>,
        offers_by_imdb: HashMap<String, CountryOffers>,
    ) -> (tempfile::TempDir, SyncEngine) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(&dir.path().join("cache.db")).await.unwrap();
        let cache = db.cache(Duration::from_secs(3600));
        let aggregator = Arc::new(AvailabilityAggregator::new(
            vec![Arc::new(StubSource { offers_by_imdb }) as Arc<dyn AvailabilitySource>],
            cache.clone(),
            db.blacklist(1),
            Duration::from_secs(3600),
        ));
        let engine = SyncEngine::new(Arc::new(config), pvr, aggregator, cache);
        (dir, engine)
    }

    #[tokio::test]
    async fn dry_run_unmonitor_touches_nothing() {
        let pvr = MockPvr::with_library(vec![breaking_bad("2024-01-01T00:00:00Z", &[1, 2])]);
        let offers =
            HashMap::from([("tt0903747".to_string(), netflix_offer(&[]))]);
        let (_dir, engine) =
            engine_with(test_config(ConfiguredAction::Unmonitor, true), pvr.clone(), offers).await;

        let results = engine.run_sync(None).await.unwrap();
        assert_eq!(results.len(), 1);

        let result = &results[0];
        assert!(result.success);
        assert_eq!(result.action_taken, SyncAction::Unmonitor);
        assert!(result.message.contains("would unmonitor series 'Breaking Bad'"));
        assert!(pvr.mutations().is_empty());
    }

    #[tokio::test]
    async fn partial_availability_downgrades_delete_and_orders_seasons() {
        let pvr = MockPvr::with_library(vec![breaking_bad("2024-01-01T00:00:00Z", &[1, 2, 3])]);
        let offers = HashMap::from([("tt0903747".to_string(), netflix_offer(&[1, 2]))]);
        let (_dir, engine) =
            engine_with(test_config(ConfiguredAction::Delete, false), pvr.clone(), offers).await;

        let results = engine.run_sync(None).await.unwrap();
        let result = &results[0];

        assert!(result.success);
        assert_eq!(result.action_taken, SyncAction::Unmonitor);
        assert_eq!(
            pvr.mutations(),
            vec!["unmonitor_season(1, 1)", "unmonitor_season(1, 2)"]
        );
    }

    #[tokio::test]
    async fn unavailable_series_yields_none_action() {
        let pvr = MockPvr::with_library(vec![breaking_bad("2024-01-01T00:00:00Z", &[1, 2])]);
        let (_dir, engine) = engine_with(
            test_config(ConfiguredAction::Unmonitor, true),
            pvr.clone(),
            HashMap::new(),
        )
        .await;

        let results = engine.run_sync(None).await.unwrap();
        let result = &results[0];

        assert!(result.success);
        assert_eq!(result.action_taken, SyncAction::None);
        assert_eq!(result.message, "not available on any configured streaming provider");
        assert!(pvr.mutations().is_empty());
    }

    #[tokio::test]
    async fn recently_added_series_is_not_processed() {
        let recent = (Utc::now() - ChronoDuration::days(2)).to_rfc3339();
        let pvr = MockPvr::with_library(vec![breaking_bad(&recent, &[1])]);
        let offers = HashMap::from([("tt0903747".to_string(), netflix_offer(&[]))]);
        let (_dir, engine) =
            engine_with(test_config(ConfiguredAction::Unmonitor, true), pvr, offers).await;

        let results = engine.run_sync(None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn malformed_added_date_is_treated_as_not_recent() {
        let pvr = MockPvr::with_library(vec![breaking_bad("yesterday-ish", &[1])]);
        let offers = HashMap::from([("tt0903747".to_string(), netflix_offer(&[]))]);
        let (_dir, engine) =
            engine_with(test_config(ConfiguredAction::Unmonitor, true), pvr, offers).await;

        let results = engine.run_sync(None).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn series_without_imdb_id_is_reported_not_failed() {
        let series: Series = serde_json::from_value(serde_json::json!({
            "id": 7,
            "title": "Obscure Show",
            "monitored": true,
            "added": "2020-01-01T00:00:00Z",
            "seasons": [{"seasonNumber": 1, "monitored": true}]
        }))
        .unwrap();
        let pvr = MockPvr::with_library(vec![series]);
        let (_dir, engine) = engine_with(
            test_config(ConfiguredAction::Unmonitor, true),
            pvr,
            HashMap::new(),
        )
        .await;

        let results = engine.run_sync(None).await.unwrap();
        let result = &results[0];
        assert!(result.success);
        assert_eq!(result.action_taken, SyncAction::None);
        assert!(result.message.contains("no IMDb id"));
    }

    #[tokio::test]
    async fn dry_run_is_idempotent() {
        let pvr = MockPvr::with_library(vec![
            breaking_bad("2024-01-01T00:00:00Z", &[1, 2]),
        ]);
        let offers = HashMap::from([("tt0903747".to_string(), netflix_offer(&[1, 2]))]);
        let (_dir, engine) =
            engine_with(test_config(ConfiguredAction::Unmonitor, true), pvr, offers).await;

        let first = engine.run_sync(None).await.unwrap();
        let second = engine.run_sync(None).await.unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.message, b.message);
            assert_eq!(a.action_taken, b.action_taken);
            assert_eq!(a.success, b.success);
        }
    }

    #[tokio::test]
    async fn cancellation_returns_partial_results() {
        let mut second = breaking_bad("2024-01-01T00:00:00Z", &[1]);
        second.id = 2;
        second.title = "Better Call Saul".to_string();
        second.imdb_id = Some("tt3032476".to_string());

        let pvr = MockPvr::with_library(vec![
            breaking_bad("2024-01-01T00:00:00Z", &[1]),
            second,
        ]);
        let (_dir, engine) = engine_with(
            test_config(ConfiguredAction::Unmonitor, true),
            pvr,
            HashMap::new(),
        )
        .await;

        // Cancel before the run starts: the loop must exit at the first
        // boundary with whatever was collected (nothing).
        engine.cancellation_token().cancel();
        let results = engine.run_sync(None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn connectivity_report_never_errors() {
        let pvr = MockPvr::with_library(Vec::new());
        let (_dir, engine) = engine_with(
            test_config(ConfiguredAction::Unmonitor, true),
            pvr,
            HashMap::new(),
        )
        .await;

        let report = engine.test_connectivity().await;
        assert!(report.pvr.connected);
        assert!(report.aggregator.initialized);
        assert_eq!(report.aggregator.sources, 1);
        assert!(report.cache.initialized);
    }
}
