use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::GovernorError;

pub const DEFAULT_API_BASE_URL: &str = "https://v3.football.api-sports.io";

// Upper bounds accepted by `GovernorConfig::validate`
pub const MAX_REQUEST_INTERVAL_MS: u64 = 60_000;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 5 * 60_000;
pub const MAX_RATE_LIMIT_BACKOFF_MS: u64 = 60 * 60_000;
pub const MAX_CACHE_TTL_MS: u64 = 24 * 60 * 60_000;

/// Tuning knobs for the request governor. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Minimum spacing between two consecutive upstream dispatches
    pub min_request_interval_ms: u64,
    pub max_concurrent_requests: usize,
    pub cache_ttl_ms: u64,
    /// Requeues allowed after the first attempt
    pub max_retries: u32,
    pub request_timeout_ms: u64,
    pub max_cache_entries: usize,
    /// Oldest entries dropped at once when the cache overflows
    pub cache_eviction_batch: usize,
    /// Base cooldown after a rate-limit hit; 0 disables the cooldown
    pub rate_limit_backoff_ms: u64,
    pub max_rate_limit_backoff_ms: u64,
    pub backoff_jitter: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            min_request_interval_ms: 100,
            max_concurrent_requests: 5,
            cache_ttl_ms: 5 * 60 * 1000,
            max_retries: 3,
            request_timeout_ms: 10_000,
            max_cache_entries: 100,
            cache_eviction_batch: 20,
            rate_limit_backoff_ms: 1_000,
            max_rate_limit_backoff_ms: 30_000,
            backoff_jitter: true,
        }
    }
}

impl GovernorConfig {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    pub fn max_rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.max_rate_limit_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), GovernorError> {
        if self.max_concurrent_requests == 0 {
            return Err(GovernorError::Config(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.max_cache_entries == 0 {
            return Err(GovernorError::Config(
                "max_cache_entries must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(GovernorError::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_rate_limit_backoff_ms < self.rate_limit_backoff_ms {
            return Err(GovernorError::Config(
                "max_rate_limit_backoff_ms must not be below rate_limit_backoff_ms".to_string(),
            ));
        }

        let upper_bounds = [
            ("min_request_interval_ms", self.min_request_interval_ms, MAX_REQUEST_INTERVAL_MS),
            ("request_timeout_ms", self.request_timeout_ms, MAX_REQUEST_TIMEOUT_MS),
            ("max_rate_limit_backoff_ms", self.max_rate_limit_backoff_ms, MAX_RATE_LIMIT_BACKOFF_MS),
            ("cache_ttl_ms", self.cache_ttl_ms, MAX_CACHE_TTL_MS),
        ];
        for (name, value, max) in upper_bounds {
            if value > max {
                return Err(GovernorError::Config(format!(
                    "{} must be at most {} (got {})",
                    name, max, value
                )));
            }
        }
        Ok(())
    }

    /// Applies `GOVERNOR_*` environment overrides on top of the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_request_interval_ms: env_or("GOVERNOR_MIN_REQUEST_INTERVAL_MS", defaults.min_request_interval_ms),
            max_concurrent_requests: env_or("GOVERNOR_MAX_CONCURRENT_REQUESTS", defaults.max_concurrent_requests),
            cache_ttl_ms: env_or("GOVERNOR_CACHE_TTL_MS", defaults.cache_ttl_ms),
            max_retries: env_or("GOVERNOR_MAX_RETRIES", defaults.max_retries),
            request_timeout_ms: env_or("GOVERNOR_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            max_cache_entries: env_or("GOVERNOR_MAX_CACHE_ENTRIES", defaults.max_cache_entries),
            cache_eviction_batch: env_or("GOVERNOR_CACHE_EVICTION_BATCH", defaults.cache_eviction_batch),
            rate_limit_backoff_ms: env_or("GOVERNOR_RATE_LIMIT_BACKOFF_MS", defaults.rate_limit_backoff_ms),
            max_rate_limit_backoff_ms: env_or(
                "GOVERNOR_MAX_RATE_LIMIT_BACKOFF_MS",
                defaults.max_rate_limit_backoff_ms,
            ),
            backoff_jitter: env_or("GOVERNOR_BACKOFF_JITTER", defaults.backoff_jitter),
        }
    }
}

/// Application settings: upstream location, credential and governor tuning.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub governor: GovernorConfig,
    pub log_level: log::LevelFilter,
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            api_base_url: env::var("FOOTBALL_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            api_key: env::var("FOOTBALL_API_KEY").ok().and_then(normalize_api_key),
            governor: GovernorConfig::from_env(),
            log_level: env::var("LOG_LEVEL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(log::LevelFilter::Info),
        }
    }

    pub fn validate_and_log(&self) -> Result<(), GovernorError> {
        if self.api_base_url.trim().is_empty() {
            return Err(GovernorError::Config(
                "FOOTBALL_API_BASE_URL cannot be empty".to_string(),
            ));
        }
        url::Url::parse(&self.api_base_url)
            .map_err(|e| GovernorError::Config(format!("invalid FOOTBALL_API_BASE_URL: {}", e)))?;
        self.governor.validate()?;

        // Never log the key itself
        log::info!(
            "Settings loaded: base_url={}, api_key={}, governor={:?}",
            self.api_base_url,
            if self.api_key.is_some() { "set" } else { "missing" },
            self.governor
        );
        if self.api_key.is_none() {
            log::warn!("FOOTBALL_API_KEY is not set; every request will be rejected with NoCredential");
        }
        Ok(())
    }
}

/// Blank keys and common placeholders count as "no credential".
pub fn normalize_api_key(raw: String) -> Option<String> {
    let key = raw.trim();
    if key.is_empty() {
        return None;
    }
    let lowered = key.to_ascii_lowercase();
    if lowered == "your_api_key" || lowered == "your-api-key" || lowered == "changeme" {
        return None;
    }
    Some(key.to_string())
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = GovernorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.max_concurrent_requests, 5);
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let config = GovernorConfig {
            max_concurrent_requests: 0,
            ..GovernorConfig::default()
        };
        assert!(matches!(config.validate(), Err(GovernorError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_unbounded_durations() {
        let stalled = GovernorConfig {
            min_request_interval_ms: u64::MAX,
            ..GovernorConfig::default()
        };
        assert!(matches!(stalled.validate(), Err(GovernorError::Config(_))));

        let endless_cooldown = GovernorConfig {
            max_rate_limit_backoff_ms: MAX_RATE_LIMIT_BACKOFF_MS + 1,
            ..GovernorConfig::default()
        };
        assert!(endless_cooldown.validate().is_err());

        let forever_cached = GovernorConfig {
            cache_ttl_ms: u64::MAX,
            ..GovernorConfig::default()
        };
        assert!(forever_cached.validate().is_err());

        let at_limit = GovernorConfig {
            min_request_interval_ms: MAX_REQUEST_INTERVAL_MS,
            cache_ttl_ms: MAX_CACHE_TTL_MS,
            ..GovernorConfig::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_field_defaults() {
        let config: GovernorConfig =
            serde_json::from_str(r#"{"max_retries": 1, "cache_ttl_ms": 600000}"#).unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.min_request_interval_ms, GovernorConfig::default().min_request_interval_ms);
    }

    #[test]
    fn test_normalize_api_key() {
        assert_eq!(normalize_api_key("  ".to_string()), None);
        assert_eq!(normalize_api_key("YOUR_API_KEY".to_string()), None);
        assert_eq!(normalize_api_key(" abc123 ".to_string()), Some("abc123".to_string()));
    }
}
