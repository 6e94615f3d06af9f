//! redundarr - reconciles a Sonarr library against streaming subscriptions.
//!
//! Series that are already watchable on a service the user pays for get
//! unmonitored (or deleted) in Sonarr, so the PVR stops hoarding what the
//! subscriptions already cover.

mod cli;
mod config;
mod db;
mod error;
mod services;
mod sync;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::cli::{CliOptions, Command, ConfigCommand, ProvidersCommand, SyncOptions};
use crate::config::Config;
use crate::db::{CacheRepository, Database};
use crate::services::availability::AvailabilityAggregator;
use crate::services::sonarr::SonarrClient;
use crate::services::source::AvailabilitySource;
use crate::services::streaming_availability::StreamingAvailabilityClient;
use crate::services::tmdb::TmdbClient;
use crate::services::utelly::UtellyClient;
use crate::services::providers;
use crate::sync::{summarize, SyncEngine};

#[tokio::main]
async fn main() {
    let options = match CliOptions::from_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("Error: {message}\n\n{}", cli::USAGE);
            std::process::exit(1);
        }
    };

    init_tracing(options.verbosity);

    let result = match options.command {
        Command::Version => {
            println!("redundarr {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Help => {
            println!("{}", cli::USAGE);
            Ok(())
        }
        Command::Config(command) => handle_config(&options.config_path, command),
        Command::Providers(command) => handle_providers(&options.config_path, command).await,
        Command::Sync(sync_options) => handle_sync(&options.config_path, sync_options).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_config(path: &Path, command: ConfigCommand) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Init { force } => {
            config::write_example(path, force)?;
            println!("Example configuration created: {}", path.display());
            println!("\nNext steps:");
            println!("  1. Edit the file with your Sonarr URL and API key");
            println!("  2. Add the streaming services you subscribe to");
            println!("  3. Run 'redundarr config validate'");
            Ok(())
        }
        ConfigCommand::Validate => {
            let config = Config::load(path)?;
            println!("Configuration is valid: {}", path.display());
            println!("  Sonarr URL:  {}", config.sonarr.url);
            println!("  Providers:   {}", config.streaming_providers.len());
            println!("  Action:      {}", config.sync.action);
            println!("  Dry run:     {}", config.sync.dry_run);
            for provider in &config.streaming_providers {
                println!("    - {} ({})", provider.name, provider.country);
            }
            Ok(())
        }
        ConfigCommand::Info => {
            let info = config::info(path);
            println!("Config path: {}", info.path.display());
            println!("  Exists:    {}", info.exists);
            println!("  Valid:     {}", info.valid);
            if info.valid {
                println!("  Providers: {}", info.providers);
                if let Some(action) = info.action {
                    println!("  Action:    {action}");
                }
                if let Some(dry_run) = info.dry_run {
                    println!("  Dry run:   {dry_run}");
                }
            }
            for error in &info.errors {
                println!("  Problem:   {error}");
            }
            Ok(())
        }
    }
}

async fn handle_providers(path: &Path, command: ProvidersCommand) -> anyhow::Result<()> {
    match command {
        ProvidersCommand::List { country, search } => {
            let listed: Vec<&providers::ProviderInfo> = match (&country, &search) {
                (Some(country), _) => providers::providers_in_country(country),
                (None, Some(term)) => providers::search_providers(term),
                (None, None) => providers::KNOWN_PROVIDERS.iter().collect(),
            };

            if listed.is_empty() {
                println!("No providers matched.");
                return Ok(());
            }
            for provider in listed {
                println!(
                    "{:<16} {:<22} {} countries",
                    provider.key,
                    provider.display_name,
                    provider.countries.len()
                );
            }
            Ok(())
        }
        ProvidersCommand::Info { name } => {
            let info = providers::provider_info(&name)
                .with_context(|| format!("provider '{name}' is not in the known provider list"))?;
            println!("{} ({})", info.display_name, info.key);
            println!("  Countries: {}", info.countries.join(", "));
            Ok(())
        }
        ProvidersCommand::Stats => {
            let stats = providers::registry_stats();
            println!("Known providers: {}", stats.total_providers);
            println!("Covered countries: {}", stats.total_countries);

            // Cache and quota numbers need a working configuration; without
            // one the registry stats above are still useful.
            match Config::load(path) {
                Ok(config) => {
                    let config = Arc::new(config);
                    let db = Database::connect(&config.cache.resolved_path()).await?;
                    let cache = db.cache(Duration::from_secs(config.cache.cleanup_interval));

                    let cache_stats = cache.statistics().await;
                    println!("\nCache:");
                    println!("  Hits:            {}", cache_stats.hit_count);
                    println!("  Misses:          {}", cache_stats.miss_count);
                    println!("  Hit rate:        {:.2}%", cache_stats.hit_rate);
                    println!("  Id mappings:     {}", cache_stats.id_mappings);
                    println!("  Provider data:   {}", cache_stats.provider_data);
                    println!("  Blacklisted ids: {}", cache_stats.blacklisted);

                    let sources = build_sources(&config, &cache)?;
                    println!("\nSources:");
                    for source in &sources {
                        let breaker = source
                            .breaker_state()
                            .map(|s| format!(", breaker {s:?}"))
                            .unwrap_or_default();
                        match source.quota_status() {
                            Some(quota) => {
                                let saturation = quota
                                    .saturation_reason
                                    .map(|r| format!(" [{r}]"))
                                    .unwrap_or_default();
                                println!(
                                    "  {:<24} {}/{} used ({:?}){}{}",
                                    source.name(),
                                    quota.used,
                                    quota.ceiling,
                                    quota.window,
                                    breaker,
                                    saturation
                                );
                            }
                            None => println!(
                                "  {:<24} rate-limited, no quota{}",
                                source.name(),
                                breaker
                            ),
                        }
                    }
                }
                Err(e) => {
                    println!("\n(no cache/quota statistics: {e})");
                }
            }
            Ok(())
        }
        ProvidersCommand::Validate => {
            let config = Config::load(path)?;
            let mut failures = 0;
            for provider in &config.streaming_providers {
                match providers::validate_provider(&provider.name, &provider.country) {
                    Ok(()) => println!("ok    {} ({})", provider.name, provider.country),
                    Err(e) => {
                        failures += 1;
                        println!("FAIL  {} ({}): {e}", provider.name, provider.country);
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{failures} provider(s) failed validation");
            }
            Ok(())
        }
    }
}

/// Construct the enabled catalogue sources in fallback order.
fn build_sources(
    config: &Config,
    cache: &CacheRepository,
) -> anyhow::Result<Vec<Arc<dyn AvailabilitySource>>> {
    let mut sources: Vec<Arc<dyn AvailabilitySource>> = Vec::new();

    if config.provider_apis.tmdb.enabled {
        sources.push(Arc::new(TmdbClient::new(
            &config.provider_apis.tmdb,
            cache.clone(),
        )));
    }
    if config.provider_apis.streaming_availability.enabled {
        let client = StreamingAvailabilityClient::new(&config.provider_apis.streaming_availability)
            .context("streaming availability source")?;
        sources.push(Arc::new(client));
    }
    if config.provider_apis.utelly.enabled {
        let client =
            UtellyClient::new(&config.provider_apis.utelly).context("utelly source")?;
        sources.push(Arc::new(client));
    }

    if sources.is_empty() {
        anyhow::bail!("no catalogue sources enabled; enable at least provider_apis.tmdb");
    }
    Ok(sources)
}

async fn build_engine(config: Arc<Config>) -> anyhow::Result<SyncEngine> {
    let db = Database::connect(&config.cache.resolved_path()).await?;
    let cache = db.cache(Duration::from_secs(config.cache.cleanup_interval));
    let blacklist = db.blacklist(config.cache.blacklist_threshold);

    let sources = build_sources(&config, &cache)?;
    let aggregator = Arc::new(AvailabilityAggregator::new(
        sources,
        cache.clone(),
        blacklist,
        Duration::from_secs(config.provider_apis.tmdb.cache_ttl),
    ));

    let pvr = Arc::new(SonarrClient::new(&config.sonarr)?);
    Ok(SyncEngine::new(config, pvr, aggregator, cache))
}

async fn handle_sync(path: &Path, options: SyncOptions) -> anyhow::Result<()> {
    let mut config = Config::load(path)?;
    if let Some(dry_run) = options.dry_run {
        config.sync.dry_run = dry_run;
    }
    if let Some(action) = options.action {
        config.sync.action = action;
    }

    if !config.sync.dry_run && !options.confirm && !confirm_live_run(&config)? {
        println!("Aborted.");
        return Ok(());
    }

    let config = Arc::new(config);
    let engine = build_engine(config.clone()).await?;

    let report = engine.test_connectivity().await;
    if !report.pvr.connected {
        anyhow::bail!(
            "Sonarr is unreachable: {}",
            report.pvr.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    // Ctrl-C aborts at the next series boundary; partial results are kept.
    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let progress: &sync::ProgressFn = &|current, total, title| {
        eprintln!("[{current}/{total}] {title}");
    };
    let results = engine
        .run_sync(if options.json { None } else { Some(progress) })
        .await?;
    let summary = summarize(&results);

    if options.json {
        let output = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "dryRun": config.sync.dry_run,
            "action": config.sync.action.to_string(),
            "summary": summary,
            "results": results,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    for result in &results {
        let marker = if result.success { "ok  " } else { "FAIL" };
        println!("{marker}  {}", result.message);
    }
    println!();
    println!(
        "Processed {} series: {} ok, {} failed",
        summary.total_processed, summary.successful, summary.failed
    );
    for (action, count) in &summary.actions {
        println!("  {action}: {count}");
    }
    if config.sync.dry_run {
        println!(
            "\nDry run - nothing was changed. Set sync.dry_run: false (or drop --dry-run) \
             and pass --confirm to apply."
        );
    }
    Ok(())
}

fn confirm_live_run(config: &Config) -> anyhow::Result<bool> {
    print!(
        "This will {} series in Sonarr (not a dry run). Continue? [y/N] ",
        config.sync.action
    );
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}
