//! TOML configuration with environment overrides.
//!
//! Every section is optional; missing keys take the component defaults.
//! Secrets are never expected in the file: the API key comes from
//! `RANKSCOUT_API_KEY` (or `PROVIDER_API_KEY`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::budget::TokenBudgetConfig;
use crate::cache::TtlTable;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::discovery::DiscoveryConfig;
use crate::domain::Strategy;
use crate::gateway::{GatewayConfig, DEFAULT_BASE_URL};
use crate::retry::{Backoff, RetryConfig};
use crate::scoring::BusinessConfig;

pub const API_KEY_ENV: &str = "RANKSCOUT_API_KEY";
pub const FALLBACK_API_KEY_ENV: &str = "PROVIDER_API_KEY";
pub const BASE_URL_ENV: &str = "RANKSCOUT_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub base_url: String,
    /// Normally supplied through the environment.
    pub api_key: Option<String>,
    pub domain: u8,
    pub request_timeout_secs: u64,
    pub max_in_flight: usize,
    pub requests_per_second: u32,
    pub min_operating_floor: f64,
    pub balance_refresh_secs: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        let defaults = GatewayConfig::default();
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            domain: defaults.domain,
            request_timeout_secs: defaults.request_timeout.as_secs(),
            max_in_flight: defaults.max_in_flight,
            requests_per_second: defaults.requests_per_second,
            min_operating_floor: defaults.min_operating_floor,
            balance_refresh_secs: defaults.balance_refresh_interval.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    pub capacity: f64,
    pub refill_per_minute: f64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub critical_cooldown_secs: u64,
    pub health_log_interval_secs: u64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        let defaults = TokenBudgetConfig::default();
        Self {
            capacity: defaults.capacity,
            refill_per_minute: defaults.refill_per_second * 60.0,
            warning_threshold: defaults.warning_threshold,
            critical_threshold: defaults.critical_threshold,
            critical_cooldown_secs: defaults.critical_cooldown.as_secs(),
            health_log_interval_secs: defaults.health_log_interval.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircuitSection {
    pub failure_threshold: u32,
    pub open_timeout_secs: u64,
    pub half_open_max_calls: u32,
}

impl Default for CircuitSection {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            open_timeout_secs: defaults.open_timeout.as_secs(),
            half_open_max_calls: defaults.half_open_max_calls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub stable_ttl_secs: u64,
    pub volatile_ttl_secs: u64,
    pub semi_volatile_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = TtlTable::default();
        Self {
            stable_ttl_secs: defaults.stable.as_secs(),
            volatile_ttl_secs: defaults.volatile.as_secs(),
            semi_volatile_ttl_secs: defaults.semi_volatile.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub segment_width_threshold: u64,
    pub min_per_segment: usize,
    pub inter_segment_delay_ms: u64,
    pub detail_batch_ceiling: usize,
    pub fallback_prefix: usize,
    pub detail_offers: bool,
    /// Outer discovery cache; `0` disables it.
    pub store_ttl_secs: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        let defaults = DiscoveryConfig::default();
        Self {
            segment_width_threshold: defaults.segment_width_threshold,
            min_per_segment: defaults.min_per_segment,
            inter_segment_delay_ms: 1_000,
            detail_batch_ceiling: defaults.detail_batch_ceiling,
            fallback_prefix: defaults.fallback_prefix,
            detail_offers: defaults.detail_offers,
            store_ttl_secs: 2 * 60 * 60,
        }
    }
}

/// Subscriber settings; installed by the binary, never by the library.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RankscoutConfig {
    pub provider: ProviderSection,
    pub budget: BudgetSection,
    pub circuit: CircuitSection,
    pub cache: CacheSection,
    pub retry: RetrySection,
    pub discovery: DiscoverySection,
    pub business: BusinessConfig,
    pub logging: LoggingConfig,
}

impl RankscoutConfig {
    /// Parse TOML content, apply process environment overrides and validate.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_toml(&content)
    }

    /// Defaults plus environment overrides, for runs without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::parse_toml("")
    }

    /// Applies overrides from `lookup`; empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(key) = non_empty(API_KEY_ENV).or_else(|| non_empty(FALLBACK_API_KEY_ENV)) {
            self.provider.api_key = Some(key);
        }
        if let Some(base_url) = non_empty(BASE_URL_ENV) {
            self.provider.base_url = base_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::InvalidValue {
                field,
                reason: reason.to_owned(),
            })
        };

        if self.provider.base_url.trim().is_empty() {
            return invalid("provider.base_url", "must not be empty");
        }
        if self.provider.max_in_flight == 0 {
            return invalid("provider.max_in_flight", "must be at least 1");
        }
        if self.provider.requests_per_second == 0 {
            return invalid("provider.requests_per_second", "must be at least 1");
        }
        if !(self.budget.capacity.is_finite() && self.budget.capacity > 0.0) {
            return invalid("budget.capacity", "must be a positive number");
        }
        if !(self.budget.refill_per_minute.is_finite() && self.budget.refill_per_minute > 0.0) {
            return invalid("budget.refill_per_minute", "must be a positive number");
        }
        if self.budget.critical_threshold > self.budget.warning_threshold {
            return invalid("budget.critical_threshold", "must not exceed warning_threshold");
        }
        if self.circuit.failure_threshold == 0 {
            return invalid("circuit.failure_threshold", "must be at least 1");
        }
        for strategy in Strategy::ALL {
            let tiers = &self.business.profile(strategy).velocity_tiers;
            if tiers.windows(2).any(|pair| pair[0].rank >= pair[1].rank) {
                return invalid(tiers_field(strategy), "ranks must be strictly ascending");
            }
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return invalid("logging.format", "must be 'pretty' or 'json'");
        }
        Ok(())
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.provider.base_url.clone(),
            api_key: self.provider.api_key.clone().unwrap_or_default(),
            domain: self.provider.domain,
            request_timeout: Duration::from_secs(self.provider.request_timeout_secs.max(1)),
            max_in_flight: self.provider.max_in_flight,
            requests_per_second: self.provider.requests_per_second,
            min_operating_floor: self.provider.min_operating_floor,
            balance_refresh_interval: Duration::from_secs(self.provider.balance_refresh_secs),
        }
    }

    pub fn budget(&self) -> TokenBudgetConfig {
        TokenBudgetConfig {
            capacity: self.budget.capacity,
            refill_per_second: self.budget.refill_per_minute / 60.0,
            initial_tokens: None,
            warning_threshold: self.budget.warning_threshold,
            critical_threshold: self.budget.critical_threshold,
            critical_cooldown: Duration::from_secs(self.budget.critical_cooldown_secs),
            health_log_interval: Duration::from_secs(self.budget.health_log_interval_secs),
        }
    }

    pub fn circuit(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit.failure_threshold,
            open_timeout: Duration::from_secs(self.circuit.open_timeout_secs),
            half_open_max_calls: self.circuit.half_open_max_calls.max(1),
        }
    }

    pub fn ttls(&self) -> TtlTable {
        TtlTable {
            stable: Duration::from_secs(self.cache.stable_ttl_secs),
            volatile: Duration::from_secs(self.cache.volatile_ttl_secs),
            semi_volatile: Duration::from_secs(self.cache.semi_volatile_ttl_secs),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            enabled: self.retry.enabled,
            max_retries: self.retry.max_retries,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.retry.base_delay_ms),
                factor: 2.0,
                max: Duration::from_millis(self.retry.max_delay_ms),
                jitter: self.retry.jitter,
            },
            ..RetryConfig::default()
        }
    }

    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            segment_width_threshold: self.discovery.segment_width_threshold,
            min_per_segment: self.discovery.min_per_segment,
            inter_segment_delay: Duration::from_millis(self.discovery.inter_segment_delay_ms),
            detail_batch_ceiling: self.discovery.detail_batch_ceiling,
            fallback_prefix: self.discovery.fallback_prefix,
            detail_offers: self.discovery.detail_offers,
        }
    }

    /// TTL of the outer discovery cache, or `None` when disabled.
    pub fn discovery_store_ttl(&self) -> Option<Duration> {
        (self.discovery.store_ttl_secs > 0).then(|| Duration::from_secs(self.discovery.store_ttl_secs))
    }
}

const fn tiers_field(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::Velocity => "business.velocity.velocity_tiers",
        Strategy::Balanced => "business.balanced.velocity_tiers",
        Strategy::Patient => "business.patient.velocity_tiers",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_component_defaults() {
        let config: RankscoutConfig = toml::from_str("").expect("parse");
        assert_eq!(config.budget(), TokenBudgetConfig::default());
        assert_eq!(config.circuit(), CircuitBreakerConfig::default());
        assert_eq!(config.ttls(), TtlTable::default());
        assert_eq!(config.discovery(), DiscoveryConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sections_override_individual_keys() {
        let config: RankscoutConfig = toml::from_str(
            r#"
            [provider]
            min_operating_floor = 25.0

            [circuit]
            failure_threshold = 3

            [business.velocity]
            velocity_tiers = [{ rank = 0, score = 100.0 }, { rank = 1000, score = 0.0 }]
            strong_buy = { min_roi_percent = 50.0, min_velocity = 80.0 }
            buy = { min_roi_percent = 30.0, min_velocity = 50.0 }
            consider = { min_roi_percent = 10.0, min_velocity = 10.0 }

            [logging]
            format = "json"
            "#,
        )
        .expect("parse");

        assert_eq!(config.gateway().min_operating_floor, 25.0);
        assert_eq!(config.circuit().failure_threshold, 3);
        assert_eq!(config.circuit().open_timeout, Duration::from_secs(60));
        assert_eq!(config.business.velocity.velocity_for(500), 50.0);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn env_overrides_prefer_primary_key() {
        let mut config = RankscoutConfig::default();
        config.apply_env(|name| match name {
            API_KEY_ENV => Some(String::new()),
            FALLBACK_API_KEY_ENV => Some("fallback".to_owned()),
            BASE_URL_ENV => Some("http://localhost:9000".to_owned()),
            _ => None,
        });
        assert_eq!(config.provider.api_key.as_deref(), Some("fallback"));
        assert_eq!(config.gateway().base_url, "http://localhost:9000");
    }

    #[test]
    fn validation_rejects_unknown_log_format() {
        let mut config = RankscoutConfig::default();
        config.logging.format = "xml".to_owned();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "logging.format",
                ..
            })
        ));
    }

    #[test]
    fn validation_rejects_unsorted_velocity_tiers() {
        let config: RankscoutConfig = toml::from_str(
            r#"
            [business.patient]
            velocity_tiers = [{ rank = 5000, score = 20.0 }, { rank = 10, score = 100.0 }]
            strong_buy = { min_roi_percent = 50.0, min_velocity = 80.0 }
            buy = { min_roi_percent = 30.0, min_velocity = 50.0 }
            consider = { min_roi_percent = 10.0, min_velocity = 10.0 }
            "#,
        )
        .expect("parse");

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "business.patient.velocity_tiers",
                ..
            })
        ));
        assert!(RankscoutConfig::parse_toml(
            "[business.patient]\nvelocity_tiers = [{ rank = 10, score = 1.0 }, { rank = 10, score = 0.0 }]\nstrong_buy = { min_roi_percent = 1.0, min_velocity = 1.0 }\nbuy = { min_roi_percent = 1.0, min_velocity = 1.0 }\nconsider = { min_roi_percent = 1.0, min_velocity = 1.0 }\n"
        )
        .is_err());
    }
}
