//! Canonical streaming-provider keys.
//!
//! Every catalogue API spells provider names differently ("Amazon Prime
//! Video", "amazonprime", "Prime Video"). All of them funnel through
//! [`canonical_provider_key`]: explicit alias table first, then a
//! longest-prefix match for regional variants ("Netflix Germany"), then a
//! bounded fuzzy match, then a deterministic slug fallback. The result is a
//! stable lowercase-hyphen key comparable across sources and user config.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::Serialize;

/// Alias -> canonical key, both in slug form. Identity entries make the
/// mapping idempotent; order does not matter (longest alias wins at the
/// prefix stage).
static ALIASES: &[(&str, &str)] = &[
    ("netflix", "netflix"),
    ("amazon-prime", "amazon-prime"),
    ("amazon-prime-video", "amazon-prime"),
    ("amazon-instant-video", "amazon-prime"),
    ("amazon-video", "amazon-prime"),
    ("amazonprime", "amazon-prime"),
    ("prime-video", "amazon-prime"),
    ("prime", "amazon-prime"),
    ("amazon", "amazon-prime"),
    ("disney-plus", "disney-plus"),
    ("disneyplus", "disney-plus"),
    ("disney", "disney-plus"),
    ("hbo-max", "hbo-max"),
    ("hbomax", "hbo-max"),
    ("hbo", "hbo-max"),
    ("max", "hbo-max"),
    ("apple-tv", "apple-tv"),
    ("apple-tv-plus", "apple-tv"),
    ("appletv", "apple-tv"),
    ("appletvplus", "apple-tv"),
    ("apple", "apple-tv"),
    ("apple-itunes", "apple-itunes"),
    ("itunes", "apple-itunes"),
    ("paramount-plus", "paramount-plus"),
    ("paramountplus", "paramount-plus"),
    ("paramount", "paramount-plus"),
    ("hulu", "hulu"),
    ("peacock", "peacock"),
    ("sky-go", "sky-go"),
    ("skygo", "sky-go"),
    ("sky", "sky-go"),
    ("wow", "wow"),
    ("google-play", "google-play"),
    ("google-play-movies", "google-play"),
    ("microsoft-store", "microsoft-store"),
    ("vudu", "vudu"),
    ("youtube", "youtube"),
];

static ALIAS_MAP: Lazy<BTreeMap<&'static str, &'static str>> =
    Lazy::new(|| ALIASES.iter().copied().collect());

/// Aliases sorted longest-first for the regional-prefix stage.
static ALIASES_BY_LENGTH: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    let mut aliases: Vec<_> = ALIASES.to_vec();
    aliases.sort_by_key(|(alias, _)| std::cmp::Reverse(alias.len()));
    aliases
});

const FUZZY_THRESHOLD: f64 = 0.8;

/// Deterministic slug: lowercase, non-alphanumeric runs collapse to single
/// hyphens, no leading/trailing hyphens.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    out
}

/// Map a provider name from any catalogue API onto its canonical key.
pub fn canonical_provider_key(name: &str) -> String {
    let normalised = slug(name);
    if normalised.is_empty() {
        return normalised;
    }

    // Explicit table is authoritative.
    if let Some(key) = ALIAS_MAP.get(normalised.as_str()) {
        return (*key).to_string();
    }

    // Regional suffixes: prefer the longest alias that prefixes the name.
    for (alias, key) in ALIASES_BY_LENGTH.iter() {
        if normalised.starts_with(alias)
            && normalised.as_bytes().get(alias.len()) == Some(&b'-')
        {
            return (*key).to_string();
        }
    }

    // Bounded fuzzy stage for typos and minor spelling drift.
    let mut best: Option<(f64, &str)> = None;
    for (alias, key) in ALIASES.iter() {
        let score = strsim::normalized_levenshtein(&normalised, alias);
        if score >= FUZZY_THRESHOLD && best.map_or(true, |(s, _)| score > s) {
            best = Some((score, key));
        }
    }
    if let Some((_, key)) = best {
        return key.to_string();
    }

    normalised
}

/// A well-known streaming provider, for the `providers` CLI surface and
/// config validation hints.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub key: &'static str,
    pub display_name: &'static str,
    pub countries: &'static [&'static str],
}

pub static KNOWN_PROVIDERS: &[ProviderInfo] = &[
    ProviderInfo {
        key: "netflix",
        display_name: "Netflix",
        countries: &[
            "US", "CA", "GB", "IE", "DE", "AT", "CH", "FR", "BE", "NL", "IT", "ES", "PT", "SE",
            "NO", "DK", "FI", "PL", "CZ", "AU", "NZ", "JP", "KR", "BR", "MX", "IN",
        ],
    },
    ProviderInfo {
        key: "amazon-prime",
        display_name: "Amazon Prime Video",
        countries: &[
            "US", "CA", "GB", "IE", "DE", "AT", "FR", "BE", "NL", "IT", "ES", "SE", "PL", "AU",
            "JP", "BR", "MX", "IN",
        ],
    },
    ProviderInfo {
        key: "disney-plus",
        display_name: "Disney+",
        countries: &[
            "US", "CA", "GB", "IE", "DE", "AT", "CH", "FR", "BE", "NL", "IT", "ES", "PT", "SE",
            "NO", "DK", "FI", "AU", "NZ", "JP", "BR", "MX",
        ],
    },
    ProviderInfo {
        key: "hbo-max",
        display_name: "HBO Max",
        countries: &["US", "DK", "SE", "NO", "FI", "ES", "PT", "PL", "BR", "MX", "AR", "CL", "CO"],
    },
    ProviderInfo {
        key: "apple-tv",
        display_name: "Apple TV+",
        countries: &[
            "US", "CA", "GB", "IE", "DE", "AT", "CH", "FR", "BE", "NL", "IT", "ES", "SE", "NO",
            "DK", "FI", "AU", "NZ", "JP", "BR", "MX",
        ],
    },
    ProviderInfo {
        key: "apple-itunes",
        display_name: "Apple iTunes",
        countries: &["US", "CA", "GB", "DE", "FR", "IT", "ES", "NL", "AU", "JP", "BR", "MX"],
    },
    ProviderInfo {
        key: "paramount-plus",
        display_name: "Paramount+",
        countries: &["US", "CA", "GB", "IE", "DE", "AT", "CH", "FR", "IT", "AU", "BR", "MX"],
    },
    ProviderInfo {
        key: "hulu",
        display_name: "Hulu",
        countries: &["US"],
    },
    ProviderInfo {
        key: "peacock",
        display_name: "Peacock",
        countries: &["US"],
    },
    ProviderInfo {
        key: "sky-go",
        display_name: "Sky Go",
        countries: &["GB", "IE", "DE", "AT", "IT"],
    },
    ProviderInfo {
        key: "wow",
        display_name: "WOW",
        countries: &["DE", "AT"],
    },
    ProviderInfo {
        key: "google-play",
        display_name: "Google Play Movies",
        countries: &["US", "CA", "GB", "DE", "FR", "IT", "ES", "NL", "AU", "JP", "BR", "MX", "IN"],
    },
    ProviderInfo {
        key: "microsoft-store",
        display_name: "Microsoft Store",
        countries: &["US", "CA", "GB", "DE", "FR", "IT", "ES", "AU"],
    },
    ProviderInfo {
        key: "vudu",
        display_name: "Vudu",
        countries: &["US"],
    },
    ProviderInfo {
        key: "youtube",
        display_name: "YouTube",
        countries: &["US", "CA", "GB", "DE", "FR", "IT", "ES", "NL", "AU", "JP", "BR", "MX", "IN"],
    },
];

pub fn provider_info(key: &str) -> Option<&'static ProviderInfo> {
    let canonical = canonical_provider_key(key);
    KNOWN_PROVIDERS.iter().find(|p| p.key == canonical)
}

pub fn providers_in_country(country: &str) -> Vec<&'static ProviderInfo> {
    let country = country.trim().to_uppercase();
    KNOWN_PROVIDERS
        .iter()
        .filter(|p| p.countries.contains(&country.as_str()))
        .collect()
}

pub fn search_providers(term: &str) -> Vec<&'static ProviderInfo> {
    let term = term.trim().to_lowercase();
    KNOWN_PROVIDERS
        .iter()
        .filter(|p| p.key.contains(&term) || p.display_name.to_lowercase().contains(&term))
        .collect()
}

/// Check a configured (name, country) pair against the registry.
pub fn validate_provider(name: &str, country: &str) -> Result<(), String> {
    let key = canonical_provider_key(name);
    let Some(info) = KNOWN_PROVIDERS.iter().find(|p| p.key == key) else {
        return Err(format!("provider '{name}' is not in the known provider list"));
    };

    let country = country.trim().to_uppercase();
    if !info.countries.contains(&country.as_str()) {
        return Err(format!(
            "provider '{}' is not known to operate in {country}",
            info.display_name
        ));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct RegistryStats {
    pub total_providers: usize,
    pub total_countries: usize,
    pub providers_by_country: BTreeMap<String, usize>,
}

pub fn registry_stats() -> RegistryStats {
    let mut providers_by_country: BTreeMap<String, usize> = BTreeMap::new();
    for provider in KNOWN_PROVIDERS {
        for country in provider.countries {
            *providers_by_country.entry((*country).to_string()).or_default() += 1;
        }
    }
    RegistryStats {
        total_providers: KNOWN_PROVIDERS.len(),
        total_countries: providers_by_country.len(),
        providers_by_country,
    }
}
