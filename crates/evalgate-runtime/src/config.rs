//! Runtime configuration.
//!
//! Built once at startup and shared behind an `Arc`. Loads from YAML, then
//! layers `EVALGATE_*` environment variables on top of whatever the file
//! (or the defaults) provided.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use evalgate_core::{CanonicalDefaults, CostAccountant, PriceTable, PricingError};

use crate::resilience::CircuitBreakerConfig;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {var}: '{value}' ({reason})")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load pricing table: {0}")]
    Pricing(#[from] PricingError),
}

/// Serde adapter for humantime strings ("15s", "7days").
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Per-stage judge timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    #[serde(with = "humantime_serde")]
    pub small: Duration,

    #[serde(with = "humantime_serde")]
    pub large: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            small: Duration::from_secs(15),
            large: Duration::from_secs(45),
        }
    }
}

/// Result cache sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: u64,

    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Retry policy for retryable provider errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Everything the pipeline and service need, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Stage 2 judge model. Default: `gpt-4o-mini`.
    pub small_model: String,

    /// Stage 3 judge model. Default: `gpt-4o`.
    pub large_model: String,

    /// Escalation threshold. Default: `0.80`.
    pub confidence_threshold: f64,

    /// Stamped on every record and part of the cache namespace.
    pub evaluator_version: String,

    /// Policy version used when no policy is found for a project.
    pub default_policy_version: u32,

    /// Stage 1 token ceiling.
    pub max_total_tokens: u64,

    /// Output tokens assumed per judge call when nothing is reported.
    pub judge_output_tokens: u64,

    pub stage_timeouts: StageTimeouts,
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,

    /// Maximum evaluations in flight for a batch.
    pub batch_concurrency: usize,

    /// Price table YAML; the built-in table when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing_path: Option<PathBuf>,

    /// Provider type → provider JSON config (credentials may come from env).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<String, JsonValue>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            small_model: "gpt-4o-mini".to_string(),
            large_model: "gpt-4o".to_string(),
            confidence_threshold: 0.80,
            evaluator_version: evalgate_core::canonical::DEFAULT_EVALUATOR_VERSION.to_string(),
            default_policy_version: 1,
            max_total_tokens: evalgate_core::checks::DEFAULT_MAX_TOTAL_TOKENS,
            judge_output_tokens: 500,
            stage_timeouts: StageTimeouts::default(),
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            batch_concurrency: 8,
            pricing_path: None,
            providers: BTreeMap::new(),
        }
    }
}

impl RuntimeConfig {
    const ENV_SMALL_MODEL: &'static str = "EVALGATE_SMALL_MODEL";
    const ENV_LARGE_MODEL: &'static str = "EVALGATE_LARGE_MODEL";
    const ENV_CONFIDENCE_THRESHOLD: &'static str = "EVALGATE_CONFIDENCE_THRESHOLD";
    const ENV_EVALUATOR_VERSION: &'static str = "EVALGATE_EVALUATOR_VERSION";
    const ENV_MAX_TOTAL_TOKENS: &'static str = "EVALGATE_MAX_TOTAL_TOKENS";
    const ENV_SMALL_TIMEOUT: &'static str = "EVALGATE_SMALL_TIMEOUT";
    const ENV_LARGE_TIMEOUT: &'static str = "EVALGATE_LARGE_TIMEOUT";
    const ENV_CACHE_CAPACITY: &'static str = "EVALGATE_CACHE_CAPACITY";
    const ENV_CACHE_TTL: &'static str = "EVALGATE_CACHE_TTL";
    const ENV_BATCH_CONCURRENCY: &'static str = "EVALGATE_BATCH_CONCURRENCY";
    const ENV_PRICING_PATH: &'static str = "EVALGATE_PRICING_PATH";

    /// Parse a YAML document. Missing keys keep their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    /// Defaults with `EVALGATE_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|var| std::env::var(var).ok())
    }

    /// Optional file, then environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.with_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = non_empty(&lookup, Self::ENV_SMALL_MODEL) {
            self.small_model = v;
        }
        if let Some(v) = non_empty(&lookup, Self::ENV_LARGE_MODEL) {
            self.large_model = v;
        }
        if let Some(v) = non_empty(&lookup, Self::ENV_EVALUATOR_VERSION) {
            self.evaluator_version = v;
        }
        if let Some(v) = parse_var(&lookup, Self::ENV_CONFIDENCE_THRESHOLD)? {
            self.confidence_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, Self::ENV_MAX_TOTAL_TOKENS)? {
            self.max_total_tokens = v;
        }
        if let Some(v) = parse_var(&lookup, Self::ENV_CACHE_CAPACITY)? {
            self.cache.capacity = v;
        }
        if let Some(v) = parse_var(&lookup, Self::ENV_BATCH_CONCURRENCY)? {
            self.batch_concurrency = v;
        }
        if let Some(v) = parse_duration_var(&lookup, Self::ENV_SMALL_TIMEOUT)? {
            self.stage_timeouts.small = v;
        }
        if let Some(v) = parse_duration_var(&lookup, Self::ENV_LARGE_TIMEOUT)? {
            self.stage_timeouts.large = v;
        }
        if let Some(v) = parse_duration_var(&lookup, Self::ENV_CACHE_TTL)? {
            self.cache.ttl = v;
        }
        if let Some(v) = non_empty(&lookup, Self::ENV_PRICING_PATH) {
            self.pricing_path = Some(PathBuf::from(v));
        }
        Ok(self)
    }

    /// Range checks the types cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.small_model.trim().is_empty() || self.large_model.trim().is_empty() {
            return Err(ConfigError::Invalid("judge model names must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.default_policy_version == 0 {
            return Err(ConfigError::Invalid("default_policy_version must be at least 1".into()));
        }
        if self.stage_timeouts.small.is_zero() || self.stage_timeouts.large.is_zero() {
            return Err(ConfigError::Invalid("stage timeouts must be positive".into()));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.batch_concurrency == 0 {
            return Err(ConfigError::Invalid("batch_concurrency must be at least 1".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.success_threshold == 0
        {
            return Err(ConfigError::Invalid("circuit breaker thresholds must be positive".into()));
        }
        Ok(())
    }

    /// Cost accountant over the configured price table.
    pub fn cost_accountant(&self) -> Result<CostAccountant, ConfigError> {
        let table = match &self.pricing_path {
            Some(path) => PriceTable::from_yaml_file(path)?,
            None => PriceTable::builtin(),
        };
        Ok(CostAccountant::new(Arc::new(table)))
    }

    /// Canonicalizer defaults. The small model doubles as the default judge.
    pub fn canonical_defaults(&self) -> CanonicalDefaults {
        CanonicalDefaults {
            evaluator_version: self.evaluator_version.clone(),
            judge_model: self.small_model.clone(),
            policy_version: self.default_policy_version,
        }
    }
}

fn non_empty<F>(lookup: &F, var: &'static str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match non_empty(lookup, var) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidEnv {
                var,
                reason: e.to_string(),
                value,
            }),
        None => Ok(None),
    }
}

fn parse_duration_var<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, var) {
        Some(value) => humantime::parse_duration(&value)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                var,
                reason: e.to_string(),
                value,
            }),
        None => Ok(None),
    }
}
