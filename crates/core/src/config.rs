//! Deployment configuration loaded from environment variables.
//!
//! Every section has a `Default` suitable for local use and tests. Loading
//! goes through [`MediatorConfig::from_lookup`] so tests can supply values
//! without touching the process environment.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;
use crate::types::ResourceType;

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Freshness horizon per resource type.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When `false`, every TTL reads as zero and the cache is a no-op.
    pub enabled: bool,
    /// Per-type time-to-live. Missing types use [`CacheConfig::default_ttl`].
    pub ttls: HashMap<ResourceType, Duration>,
    /// TTL for types without an explicit entry.
    pub default_ttl: Duration,
}

impl CacheConfig {
    /// Effective TTL for `resource_type`; zero when caching is disabled.
    pub fn ttl_for(&self, resource_type: ResourceType) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        self.ttls
            .get(&resource_type)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// A configuration where nothing is ever cached.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttls = ResourceType::ALL
            .into_iter()
            .map(|t| (t, Duration::from_secs(default_ttl_secs(t))))
            .collect();
        Self {
            enabled: true,
            ttls,
            default_ttl: Duration::from_secs(300),
        }
    }
}

/// Built-in TTLs: cards churn fastest, workspaces almost never change.
fn default_ttl_secs(resource_type: ResourceType) -> u64 {
    match resource_type {
        ResourceType::User => 300,
        ResourceType::Card => 60,
        ResourceType::Board => 300,
        ResourceType::Workspace => 900,
        ResourceType::CustomField => 600,
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per item, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Bulk
// ---------------------------------------------------------------------------

/// Fan-out limits for bulk operations.
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Maximum number of items executing at once.
    pub max_concurrency: usize,
    /// Per remote call timeout. Exceeding it counts as a transient failure.
    pub call_timeout: Duration,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            call_timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// MediatorConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for one client session.
#[derive(Debug, Clone, Default)]
pub struct MediatorConfig {
    /// Base URL of the remote API (required only by the HTTP client).
    pub api_url: Option<String>,
    /// API token sent with every request (required only by the HTTP client).
    pub api_token: Option<String>,
    /// Refuse every mutation before it reaches the remote API.
    pub read_only: bool,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub bulk: BulkConfig,
}

impl MediatorConfig {
    /// Load configuration from process environment variables.
    ///
    /// | Env Var                          | Default |
    /// |----------------------------------|---------|
    /// | `KANBAN_API_URL`                 | unset   |
    /// | `KANBAN_API_TOKEN`               | unset   |
    /// | `KANBAN_READ_ONLY`               | `false` |
    /// | `KANBAN_CACHE_ENABLED`           | `true`  |
    /// | `KANBAN_CACHE_TTL_SECS`          | `300`   |
    /// | `KANBAN_CACHE_TTL_<TYPE>_SECS`   | per type |
    /// | `KANBAN_RETRY_MAX_ATTEMPTS`      | `3`     |
    /// | `KANBAN_RETRY_INITIAL_DELAY_MS`  | `500`   |
    /// | `KANBAN_RETRY_MAX_DELAY_MS`      | `8000`  |
    /// | `KANBAN_BULK_CONCURRENCY`        | `5`     |
    /// | `KANBAN_CALL_TIMEOUT_SECS`       | `30`    |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let default_ttl = Duration::from_secs(parse_or(
            &lookup,
            "KANBAN_CACHE_TTL_SECS",
            defaults.cache.default_ttl.as_secs(),
        )?);

        let mut ttls = HashMap::new();
        for t in ResourceType::ALL {
            let key = format!("KANBAN_CACHE_TTL_{}_SECS", t.as_str().to_ascii_uppercase());
            // An explicit global TTL overrides the built-in per-type table.
            let fallback = if lookup("KANBAN_CACHE_TTL_SECS").is_some() {
                default_ttl.as_secs()
            } else {
                default_ttl_secs(t)
            };
            ttls.insert(t, Duration::from_secs(parse_or(&lookup, &key, fallback)?));
        }

        let cache = CacheConfig {
            enabled: parse_bool_or(&lookup, "KANBAN_CACHE_ENABLED", true)?,
            ttls,
            default_ttl,
        };

        let retry = RetryConfig {
            max_attempts: parse_or(
                &lookup,
                "KANBAN_RETRY_MAX_ATTEMPTS",
                defaults.retry.max_attempts,
            )?,
            initial_delay: Duration::from_millis(parse_or(
                &lookup,
                "KANBAN_RETRY_INITIAL_DELAY_MS",
                defaults.retry.initial_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(parse_or(
                &lookup,
                "KANBAN_RETRY_MAX_DELAY_MS",
                defaults.retry.max_delay.as_millis() as u64,
            )?),
            multiplier: defaults.retry.multiplier,
        };

        let bulk = BulkConfig {
            max_concurrency: parse_or(
                &lookup,
                "KANBAN_BULK_CONCURRENCY",
                defaults.bulk.max_concurrency,
            )?,
            call_timeout: Duration::from_secs(parse_or(
                &lookup,
                "KANBAN_CALL_TIMEOUT_SECS",
                defaults.bulk.call_timeout.as_secs(),
            )?),
        };

        let config = Self {
            api_url: lookup("KANBAN_API_URL").filter(|s| !s.trim().is_empty()),
            api_token: lookup("KANBAN_API_TOKEN").filter(|s| !s.trim().is_empty()),
            read_only: parse_bool_or(&lookup, "KANBAN_READ_ONLY", false)?,
            cache,
            retry,
            bulk,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the retry or bulk machinery misbehave.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.retry.max_attempts == 0 {
            return Err(CoreError::Config(
                "KANBAN_RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(CoreError::Config(
                "Retry multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(CoreError::Config(
                "KANBAN_RETRY_INITIAL_DELAY_MS must not exceed KANBAN_RETRY_MAX_DELAY_MS"
                    .to_string(),
            ));
        }
        if self.bulk.max_concurrency == 0 {
            return Err(CoreError::Config(
                "KANBAN_BULK_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.bulk.call_timeout.is_zero() {
            return Err(CoreError::Config(
                "KANBAN_CALL_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Config(format!("{key} has an invalid value: '{raw}'"))),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(CoreError::Config(format!(
                "{key} must be a boolean, got '{raw}'"
            ))),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
