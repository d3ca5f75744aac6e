//! Runtime configuration loaded from environment variables
//!
//! Every tunable in the crate lives here and is handed to component
//! constructors by value. Nothing reads the environment after startup.
//!
//! Environment variables (all optional unless stated):
//! - `SCOUT_DB_PATH` (default: groupscout.db)
//! - `SCOUT_GATEWAY_URL` (required by the binary, http:// or https://)
//! - `SCOUT_GATEWAY_TOKEN`, `SCOUT_GATEWAY_TIMEOUT_SECS` (default: 30)
//! - `SCOUT_MAX_CONCURRENCY` (default: 2)
//! - `SCOUT_INTERVAL_<CATEGORY>_MS` per request category
//! - `SCOUT_BACKOFF_*`, `SCOUT_CACHE_*`, `SCOUT_DISCOVERY_*`, `SCOUT_SCHEDULER_*`,
//!   `SCOUT_MEMBERSHIP_*`, `SCOUT_CRAWLER_*`, `SCOUT_HEALTH_*`
//! - `SCOUT_LLM_URL`, `SCOUT_LLM_API_KEY`, `SCOUT_LLM_MODEL` (AI keyword suggestions)

use crate::gateway::Category;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Request limiter settings: global ceiling plus per-category spacing
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub max_concurrency: usize,
    pub intervals: HashMap<Category, Duration>,
}

impl ThrottleConfig {
    pub fn interval(&self, category: Category) -> Duration {
        self.intervals
            .get(&category)
            .or_else(|| self.intervals.get(&Category::Default))
            .copied()
            .unwrap_or_else(|| category.default_interval())
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            intervals: Category::ALL
                .iter()
                .map(|c| (*c, c.default_interval()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Attempts per call before a rate limit is surfaced to the caller
    pub max_attempts: u32,
    /// Upper bound of the random padding added to hard waits
    pub hard_jitter_max: Duration,
    pub ambiguous_base: Duration,
    pub ambiguous_max: Duration,
    pub max_level: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            hard_jitter_max: Duration::from_secs(5),
            ambiguous_base: Duration::from_secs(2),
            ambiguous_max: Duration::from_secs(300),
            max_level: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub search_ttl: Duration,
    pub negative_ttl: Duration,
    pub resolve_ttl: Duration,
    pub max_items: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl: Duration::from_secs(30 * 60),
            negative_ttl: Duration::from_secs(5 * 60),
            resolve_ttl: Duration::from_secs(24 * 60 * 60),
            max_items: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub max_queries: usize,
    pub search_limit: usize,
    pub max_alternatives: usize,
    pub allow_channels: bool,
    /// Number of suggestions requested from the keyword strategy per topic
    pub suggestion_count: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            medium_threshold: 0.6,
            high_threshold: 0.85,
            max_queries: 24,
            search_limit: 20,
            max_alternatives: 5,
            allow_channels: false,
            suggestion_count: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub seed: u64,
    pub cooldown: Duration,
    pub failure_backoff: Duration,
    pub sample_size: usize,
    pub base_weight: f64,
    pub evolved_weight: f64,
    pub evolved_pool_max: usize,
    /// Overrides the built-in base keyword list when non-empty
    pub base_keywords: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            cooldown: Duration::from_secs(6 * 60 * 60),
            failure_backoff: Duration::from_secs(24 * 60 * 60),
            sample_size: 40,
            base_weight: 1.0,
            evolved_weight: 3.0,
            evolved_pool_max: 500,
            base_keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MembershipConfig {
    pub per_check_delay: Duration,
    pub cycle_interval: Duration,
    pub join_delay_min: Duration,
    pub join_delay_max: Duration,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            per_check_delay: Duration::from_secs(5),
            cycle_interval: Duration::from_secs(30 * 60),
            join_delay_min: Duration::from_secs(3),
            join_delay_max: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub enable_auto_join: bool,
    /// How many recently discovered entities feed keyword evolution per batch
    pub evolution_sample: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_interval: Duration::from_secs(60),
            enable_auto_join: true,
            evolution_sample: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub check_interval: Duration,
    pub probe_peer: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60 * 60),
            probe_peer: "me".to_string(),
        }
    }
}

/// OpenAI-compatible chat completions endpoint used for keyword suggestions
#[derive(Debug, Clone)]
pub struct SuggesterConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub gateway: GatewayConfig,
    pub throttle: ThrottleConfig,
    pub backoff: BackoffConfig,
    pub cache: CacheConfig,
    pub discovery: DiscoveryConfig,
    pub scheduler: SchedulerConfig,
    pub membership: MembershipConfig,
    pub crawler: CrawlerConfig,
    pub health: HealthConfig,
    pub suggester: Option<SuggesterConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "groupscout.db".to_string(),
            gateway: GatewayConfig {
                url: None,
                token: None,
                timeout: Duration::from_secs(30),
            },
            throttle: ThrottleConfig::default(),
            backoff: BackoffConfig::default(),
            cache: CacheConfig::default(),
            discovery: DiscoveryConfig::default(),
            scheduler: SchedulerConfig::default(),
            membership: MembershipConfig::default(),
            crawler: CrawlerConfig::default(),
            health: HealthConfig::default(),
            suggester: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let src = Source { lookup: &lookup };
        let defaults = AppConfig::default();

        let gateway_url = src.string("SCOUT_GATEWAY_URL");
        if let Some(url) = &gateway_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(
                    "SCOUT_GATEWAY_URL must start with http:// or https://".to_string(),
                ));
            }
        }

        let mut throttle = defaults.throttle.clone();
        throttle.max_concurrency = src.parse("SCOUT_MAX_CONCURRENCY", throttle.max_concurrency)?;
        for category in Category::ALL {
            let key = format!("SCOUT_INTERVAL_{}_MS", category.env_suffix());
            let current = throttle.interval(category);
            throttle.intervals.insert(category, src.millis(&key, current)?);
        }

        let backoff = BackoffConfig {
            max_attempts: src.parse("SCOUT_BACKOFF_MAX_ATTEMPTS", defaults.backoff.max_attempts)?,
            hard_jitter_max: src.secs("SCOUT_BACKOFF_HARD_JITTER_SECS", defaults.backoff.hard_jitter_max)?,
            ambiguous_base: src.millis("SCOUT_BACKOFF_BASE_MS", defaults.backoff.ambiguous_base)?,
            ambiguous_max: src.secs("SCOUT_BACKOFF_MAX_SECS", defaults.backoff.ambiguous_max)?,
            max_level: src.parse("SCOUT_BACKOFF_MAX_LEVEL", defaults.backoff.max_level)?,
        };

        let cache = CacheConfig {
            search_ttl: src.secs("SCOUT_CACHE_SEARCH_TTL_SECS", defaults.cache.search_ttl)?,
            negative_ttl: src.secs("SCOUT_CACHE_NEGATIVE_TTL_SECS", defaults.cache.negative_ttl)?,
            resolve_ttl: src.secs("SCOUT_CACHE_RESOLVE_TTL_SECS", defaults.cache.resolve_ttl)?,
            max_items: src.parse("SCOUT_CACHE_MAX_ITEMS", defaults.cache.max_items)?,
        };

        let d = &defaults.discovery;
        let discovery = DiscoveryConfig {
            medium_threshold: src.parse("SCOUT_DISCOVERY_MEDIUM_THRESHOLD", d.medium_threshold)?,
            high_threshold: src.parse("SCOUT_DISCOVERY_HIGH_THRESHOLD", d.high_threshold)?,
            max_queries: src.parse("SCOUT_DISCOVERY_MAX_QUERIES", d.max_queries)?,
            search_limit: src.parse("SCOUT_DISCOVERY_SEARCH_LIMIT", d.search_limit)?,
            max_alternatives: src.parse("SCOUT_DISCOVERY_MAX_ALTERNATIVES", d.max_alternatives)?,
            allow_channels: src.parse("SCOUT_DISCOVERY_ALLOW_CHANNELS", d.allow_channels)?,
            suggestion_count: src.parse("SCOUT_DISCOVERY_SUGGESTION_COUNT", d.suggestion_count)?,
        };

        let s = &defaults.scheduler;
        let scheduler = SchedulerConfig {
            seed: src.parse("SCOUT_SCHEDULER_SEED", s.seed)?,
            cooldown: src.secs("SCOUT_SCHEDULER_COOLDOWN_SECS", s.cooldown)?,
            failure_backoff: src.secs("SCOUT_SCHEDULER_FAILURE_BACKOFF_SECS", s.failure_backoff)?,
            sample_size: src.parse("SCOUT_SCHEDULER_SAMPLE_SIZE", s.sample_size)?,
            base_weight: src.parse("SCOUT_SCHEDULER_BASE_WEIGHT", s.base_weight)?,
            evolved_weight: src.parse("SCOUT_SCHEDULER_EVOLVED_WEIGHT", s.evolved_weight)?,
            evolved_pool_max: src.parse("SCOUT_SCHEDULER_EVOLVED_POOL_MAX", s.evolved_pool_max)?,
            base_keywords: src.list("SCOUT_SCHEDULER_BASE_KEYWORDS"),
        };

        let m = &defaults.membership;
        let membership = MembershipConfig {
            per_check_delay: src.secs("SCOUT_MEMBERSHIP_CHECK_DELAY_SECS", m.per_check_delay)?,
            cycle_interval: src.secs("SCOUT_MEMBERSHIP_CYCLE_SECS", m.cycle_interval)?,
            join_delay_min: src.secs("SCOUT_MEMBERSHIP_JOIN_DELAY_MIN_SECS", m.join_delay_min)?,
            join_delay_max: src.secs("SCOUT_MEMBERSHIP_JOIN_DELAY_MAX_SECS", m.join_delay_max)?,
        };

        let c = &defaults.crawler;
        let crawler = CrawlerConfig {
            batch_size: src.parse("SCOUT_CRAWLER_BATCH_SIZE", c.batch_size)?,
            batch_interval: src.secs("SCOUT_CRAWLER_BATCH_INTERVAL_SECS", c.batch_interval)?,
            enable_auto_join: src.parse("SCOUT_CRAWLER_AUTO_JOIN", c.enable_auto_join)?,
            evolution_sample: src.parse("SCOUT_CRAWLER_EVOLUTION_SAMPLE", c.evolution_sample)?,
        };

        let health = HealthConfig {
            check_interval: src.secs("SCOUT_HEALTH_INTERVAL_SECS", defaults.health.check_interval)?,
            probe_peer: src
                .string("SCOUT_HEALTH_PROBE_PEER")
                .unwrap_or(defaults.health.probe_peer),
        };

        let suggester = match (src.string("SCOUT_LLM_URL"), src.string("SCOUT_LLM_API_KEY")) {
            (Some(url), Some(api_key)) => Some(SuggesterConfig {
                url,
                api_key,
                model: src
                    .string("SCOUT_LLM_MODEL")
                    .unwrap_or_else(|| "llama-3.3-70b-versatile".to_string()),
                max_tokens: src.parse("SCOUT_LLM_MAX_TOKENS", 512)?,
                timeout: src.secs("SCOUT_LLM_TIMEOUT_SECS", Duration::from_secs(20))?,
            }),
            (Some(_), None) => {
                log::warn!("SCOUT_LLM_URL set without SCOUT_LLM_API_KEY, using rule-based keywords");
                None
            }
            _ => None,
        };

        let config = Self {
            db_path: src.string("SCOUT_DB_PATH").unwrap_or(defaults.db_path),
            gateway: GatewayConfig {
                url: gateway_url,
                token: src.string("SCOUT_GATEWAY_TOKEN"),
                timeout: src.secs("SCOUT_GATEWAY_TIMEOUT_SECS", defaults.gateway.timeout)?,
            },
            throttle,
            backoff,
            cache,
            discovery,
            scheduler,
            membership,
            crawler,
            health,
            suggester,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.discovery;
        if !(0.0..=1.0).contains(&d.medium_threshold)
            || !(0.0..=1.0).contains(&d.high_threshold)
            || d.medium_threshold > d.high_threshold
        {
            return Err(ConfigError::InvalidValue(format!(
                "thresholds must satisfy 0 <= medium ({}) <= high ({}) <= 1",
                d.medium_threshold, d.high_threshold
            )));
        }

        if self.throttle.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "SCOUT_MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        if self.backoff.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "SCOUT_BACKOFF_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        if self.membership.join_delay_min > self.membership.join_delay_max {
            return Err(ConfigError::InvalidValue(
                "join delay min must not exceed join delay max".to_string(),
            ));
        }

        if self.scheduler.base_weight <= 0.0 || self.scheduler.evolved_weight <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "scheduler weights must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Gateway URL, required by anything that talks to the platform
    pub fn require_gateway_url(&self) -> Result<&str, ConfigError> {
        self.gateway
            .url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVariable("SCOUT_GATEWAY_URL".to_string()))
    }
}

struct Source<'a, F> {
    lookup: &'a F,
}

impl<'a, F> Source<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => raw
                .to_lowercase()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw))),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let ms = self.parse(key, default.as_millis() as u64)?;
        Ok(Duration::from_millis(ms))
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.parse(key, default.as_secs())?;
        Ok(Duration::from_secs(secs))
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.string(key)
            .map(|s| {
                s.split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
