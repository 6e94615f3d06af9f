//! Application configuration: YAML file loading, defaults and validation.
//!
//! The sync engine itself only ever sees a fully populated [`Config`]; all
//! parsing and validation happens here before anything talks to the network.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Sonarr connection settings
    pub sonarr: SonarrConfig,

    /// Catalogue source APIs (primary + optional fallbacks)
    pub provider_apis: ProviderApisConfig,

    /// Streaming services the user subscribes to
    pub streaming_providers: Vec<StreamingProviderConfig>,

    /// Sync operation behaviour
    #[serde(default)]
    pub sync: SyncConfig,

    /// Local cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SonarrConfig {
    /// Sonarr instance URL (e.g. http://localhost:8989)
    pub url: String,
    /// Sonarr API key (32 alphanumeric characters)
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderApisConfig {
    /// TMDB - always the primary source
    pub tmdb: TmdbConfig,

    /// Streaming Availability API (RapidAPI) - optional deep-link fallback
    #[serde(default)]
    pub streaming_availability: StreamingAvailabilityConfig,

    /// Utelly (RapidAPI) - optional broad-aggregator fallback
    #[serde(default)]
    pub utelly: UtellyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TmdbConfig {
    /// v3 API key or v4 read access token (JWT)
    pub api_key: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests per 10 seconds
    #[serde(default = "default_tmdb_rate_limit")]
    pub rate_limit: u32,
    /// Provider-data cache TTL in seconds
    #[serde(default = "default_tmdb_cache_ttl")]
    pub cache_ttl: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StreamingAvailabilityConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_daily_quota")]
    pub daily_quota: u32,
    #[serde(default = "default_sa_cache_ttl")]
    pub cache_ttl: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UtellyConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_monthly_quota")]
    pub monthly_quota: u32,
    #[serde(default = "default_utelly_cache_ttl")]
    pub cache_ttl: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct StreamingProviderConfig {
    /// Canonical provider key (e.g. netflix, amazon-prime)
    pub name: String,
    /// Two-letter ISO-3166-1 country code, uppercase
    pub country: String,
}

/// Action to take when a series is redundantly available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfiguredAction {
    Unmonitor,
    Delete,
}

impl fmt::Display for ConfiguredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmonitor => write!(f, "unmonitor"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_action")]
    pub action: ConfiguredAction,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    /// Don't touch series added within this many days
    #[serde(default = "default_exclude_recent_days")]
    pub exclude_recent_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            action: ConfiguredAction::Unmonitor,
            dry_run: true,
            exclude_recent_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Path to the SQLite cache file. Defaults to the user cache directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// How often expired entries are opportunistically cleaned up, in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Failure count at which an identifier is considered blacklisted
    #[serde(default = "default_blacklist_threshold")]
    pub blacklist_threshold: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            cleanup_interval: 3600,
            blacklist_threshold: 1,
        }
    }
}

impl CacheConfig {
    /// Resolve the effective cache file path.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("redundarr")
                .join("cache.db")
        })
    }
}

const fn default_true() -> bool {
    true
}
const fn default_tmdb_rate_limit() -> u32 {
    40
}
const fn default_tmdb_cache_ttl() -> u64 {
    86_400
}
const fn default_daily_quota() -> u32 {
    100
}
const fn default_sa_cache_ttl() -> u64 {
    43_200
}
const fn default_monthly_quota() -> u32 {
    1_000
}
const fn default_utelly_cache_ttl() -> u64 {
    604_800
}
const fn default_action() -> ConfiguredAction {
    ConfiguredAction::Unmonitor
}
const fn default_exclude_recent_days() -> u32 {
    7
}
const fn default_cleanup_interval() -> u64 {
    3600
}
const fn default_blacklist_threshold() -> u32 {
    1
}

impl Config {
    /// Load, normalise and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "configuration file not found: {}\nRun 'redundarr config init' to create an example configuration.",
                path.display()
            );
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid YAML in {}", path.display()))?;

        config.normalise();

        let errors = config.validate();
        if !errors.is_empty() {
            anyhow::bail!("configuration validation failed:\n  {}", errors.join("\n  "));
        }

        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Lowercase provider names, uppercase country codes, trim whitespace.
    pub fn normalise(&mut self) {
        for provider in &mut self.streaming_providers {
            provider.name = provider.name.trim().to_lowercase();
            provider.country = provider.country.trim().to_uppercase();
        }
        self.sonarr.api_key = self.sonarr.api_key.trim().to_string();
    }

    /// Validate the configuration, returning every problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match Url::parse(&self.sonarr.url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(format!("sonarr.url: unsupported scheme '{}'", url.scheme())),
            Err(e) => errors.push(format!("sonarr.url: {e}")),
        }

        if self.sonarr.api_key.len() != 32 {
            errors.push("sonarr.api_key: must be exactly 32 characters".to_string());
        } else if !self.sonarr.api_key.chars().all(|c| c.is_ascii_alphanumeric()) {
            errors.push("sonarr.api_key: must contain only alphanumeric characters".to_string());
        }

        if self.provider_apis.tmdb.enabled && self.provider_apis.tmdb.api_key.trim().is_empty() {
            errors.push("provider_apis.tmdb.api_key: required when TMDB is enabled".to_string());
        }
        if self.provider_apis.streaming_availability.enabled
            && self
                .provider_apis
                .streaming_availability
                .api_key
                .as_deref()
                .map_or(true, |k| k.trim().is_empty())
        {
            errors.push(
                "provider_apis.streaming_availability.api_key: required when enabled".to_string(),
            );
        }
        if self.provider_apis.utelly.enabled
            && self
                .provider_apis
                .utelly
                .api_key
                .as_deref()
                .map_or(true, |k| k.trim().is_empty())
        {
            errors.push("provider_apis.utelly.api_key: required when enabled".to_string());
        }

        if self.streaming_providers.is_empty() {
            errors.push("streaming_providers: at least one provider is required".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.streaming_providers {
            if provider.name.is_empty() {
                errors.push("streaming_providers: provider name cannot be empty".to_string());
            }
            if provider.country.len() != 2
                || !provider.country.chars().all(|c| c.is_ascii_uppercase())
            {
                errors.push(format!(
                    "streaming_providers: '{}' has invalid country code '{}'",
                    provider.name, provider.country
                ));
            }
            if !seen.insert((provider.name.clone(), provider.country.clone())) {
                errors.push(format!(
                    "streaming_providers: duplicate provider {} ({})",
                    provider.name, provider.country
                ));
            }
        }

        errors
    }

    /// Distinct country codes across the configured providers, sorted.
    pub fn countries(&self) -> Vec<String> {
        let mut countries: Vec<String> = self
            .streaming_providers
            .iter()
            .map(|p| p.country.clone())
            .collect();
        countries.sort();
        countries.dedup();
        countries
    }
}

/// Create an example configuration file with documentation comments.
pub fn write_example(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "configuration file already exists: {}\nUse --force to overwrite it.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    fs::write(path, EXAMPLE_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;

    tracing::info!(path = %path.display(), "example configuration created");
    Ok(())
}

/// Summary of a configuration file's state, for `config info`.
#[derive(Debug, Serialize)]
pub struct ConfigInfo {
    pub path: PathBuf,
    pub exists: bool,
    pub valid: bool,
    pub providers: usize,
    pub action: Option<ConfiguredAction>,
    pub dry_run: Option<bool>,
    pub errors: Vec<String>,
}

pub fn info(path: &Path) -> ConfigInfo {
    let exists = path.exists();
    if !exists {
        return ConfigInfo {
            path: path.to_path_buf(),
            exists,
            valid: false,
            providers: 0,
            action: None,
            dry_run: None,
            errors: vec!["file does not exist".to_string()],
        };
    }

    match Config::load(path) {
        Ok(config) => ConfigInfo {
            path: path.to_path_buf(),
            exists,
            valid: true,
            providers: config.streaming_providers.len(),
            action: Some(config.sync.action),
            dry_run: Some(config.sync.dry_run),
            errors: Vec::new(),
        },
        Err(e) => ConfigInfo {
            path: path.to_path_buf(),
            exists,
            valid: false,
            providers: 0,
            action: None,
            dry_run: None,
            errors: vec![e.to_string()],
        },
    }
}

const EXAMPLE_CONFIG: &str = r#"# redundarr configuration
#
# Reconciles your Sonarr library against the streaming services you
# subscribe to: series that are already watchable on a subscription you
# pay for get unmonitored (or deleted) in Sonarr.

# Sonarr connection settings.
# The API key lives under Sonarr -> Settings -> General -> Security.
sonarr:
  url: "http://localhost:8989"
  api_key: "abcdefghijklmnopqrstuvwxyz123456"

# Catalogue APIs used to answer "where is this series streaming?".
# TMDB is the primary source and the only required one.
provider_apis:
  tmdb:
    api_key: "your-tmdb-api-key"
    enabled: true
    rate_limit: 40        # requests per 10 seconds
    cache_ttl: 86400      # 24 hours
  streaming_availability:
    enabled: false
    # api_key: "your-rapidapi-key"
    daily_quota: 100
    cache_ttl: 43200      # 12 hours
  utelly:
    enabled: false
    # api_key: "your-rapidapi-key"
    monthly_quota: 1000
    cache_ttl: 604800     # 7 days

# Streaming services you subscribe to. Names are canonical lowercase
# slugs; common ones: netflix, amazon-prime, disney-plus, hbo-max,
# apple-tv, paramount-plus, hulu.
streaming_providers:
  - name: "netflix"
    country: "US"
  - name: "amazon-prime"
    country: "US"

# Sync behaviour.
sync:
  action: "unmonitor"       # "unmonitor" or "delete"
  dry_run: true             # preview without touching Sonarr
  exclude_recent_days: 7    # leave recently added series alone

# Local cache (optional).
# cache:
#   path: "~/.cache/redundarr/cache.db"
#   cleanup_interval: 3600
#   blacklist_threshold: 1
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
sonarr:
  url: "http://localhost:8989"
  api_key: "abcdefghijklmnopqrstuvwxyz123456"
provider_apis:
  tmdb:
    api_key: "tmdb-key"
streaming_providers:
  - name: "Netflix"
    country: "us"
"#
    }

    #[test]
    fn defaults_applied() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.normalise();

        assert!(config.provider_apis.tmdb.enabled);
        assert_eq!(config.provider_apis.tmdb.rate_limit, 40);
        assert_eq!(config.provider_apis.tmdb.cache_ttl, 86_400);
        assert!(!config.provider_apis.streaming_availability.enabled);
        assert_eq!(config.provider_apis.streaming_availability.daily_quota, 100);
        assert_eq!(config.provider_apis.utelly.monthly_quota, 1_000);
        assert_eq!(config.sync.action, ConfiguredAction::Unmonitor);
        assert!(config.sync.dry_run);
        assert_eq!(config.sync.exclude_recent_days, 7);
        assert_eq!(config.cache.blacklist_threshold, 1);
    }

    #[test]
    fn normalisation_fixes_case() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.normalise();

        assert_eq!(config.streaming_providers[0].name, "netflix");
        assert_eq!(config.streaming_providers[0].country, "US");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn rejects_bad_api_key() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.sonarr.api_key = "too-short".to_string();
        config.normalise();

        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("sonarr.api_key")));
    }

    #[test]
    fn rejects_duplicate_providers() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.streaming_providers.push(StreamingProviderConfig {
            name: "Netflix ".to_string(),
            country: "US".to_string(),
        });
        config.normalise();

        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("duplicate provider")));
    }

    #[test]
    fn rejects_enabled_fallback_without_key() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.provider_apis.streaming_availability.enabled = true;
        config.normalise();

        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| e.contains("streaming_availability.api_key")));
    }

    #[test]
    fn countries_sorted_and_deduped() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.streaming_providers.push(StreamingProviderConfig {
            name: "hulu".to_string(),
            country: "DE".to_string(),
        });
        config.streaming_providers.push(StreamingProviderConfig {
            name: "amazon-prime".to_string(),
            country: "US".to_string(),
        });
        config.normalise();

        assert_eq!(config.countries(), vec!["DE", "US"]);
    }

    #[test]
    fn example_config_parses() {
        let config: Config = serde_yaml::from_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config.streaming_providers.len(), 2);
    }
}
