use serde::{Deserialize, Deserializer, Serialize};

use crate::ratelimit::OrderLimitConfig;
use crate::utils::{get_env_with_prefix, parse_env_with_prefix};

/// Main configuration for the funding core
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub order_limits: OrderLimitConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,
    #[serde(default)]
    pub payments: PaymentConfig,
    #[serde(default)]
    pub pledges: PledgeConfig,
    #[serde(default)]
    pub dev: DevConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// Recurring billing policy
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Failed renewal attempts tolerated before a subscription is deactivated
    #[serde(default = "default_max_charge_retries")]
    pub max_charge_retries: u32,
    /// Days to wait before retrying a failed renewal
    #[serde(default = "default_retry_delay_days")]
    pub retry_delay_days: i64,
    /// New subscription amounts must be a positive multiple of this (minor units)
    #[serde(
        default = "default_amount_granularity",
        deserialize_with = "deserialize_granularity"
    )]
    pub amount_granularity: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PaymentConfig {
    /// Upper bound on a payment provider round-trip
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Platform fee applied when an order carries no override
    #[serde(default = "default_platform_fee_percent")]
    pub platform_fee_percent: u32,
    /// Validity of prepaid credit issued to organizations
    #[serde(default = "default_prepaid_validity_days")]
    pub prepaid_validity_days: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PledgeConfig {
    /// Minimum popularity (stars) for an external pledge target
    #[serde(default = "default_min_popularity")]
    pub min_popularity: u32,
}

/// Development mode configuration
///
/// When enabled, provider and internal failures are reported to callers with
/// their full message.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DevConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_charge_retries: default_max_charge_retries(),
            retry_delay_days: default_retry_delay_days(),
            amount_granularity: default_amount_granularity(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout_secs(),
            platform_fee_percent: default_platform_fee_percent(),
            prepaid_validity_days: default_prepaid_validity_days(),
        }
    }
}

impl Default for PledgeConfig {
    fn default() -> Self {
        Self {
            min_popularity: default_min_popularity(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_charge_retries() -> u32 {
    6
}

fn default_retry_delay_days() -> i64 {
    2
}

fn default_amount_granularity() -> i64 {
    100
}

fn deserialize_granularity<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = i64::deserialize(deserializer)?;
    if value <= 0 {
        return Err(serde::de::Error::custom(format!(
            "amount_granularity must be positive, got {value}"
        )));
    }
    Ok(value)
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_platform_fee_percent() -> u32 {
    5
}

fn default_prepaid_validity_days() -> i64 {
    365
}

fn default_min_popularity() -> u32 {
    100
}

impl DevConfig {
    pub fn is_dev_mode(&self) -> bool {
        self.enabled
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_order_limits(mut self, limits: OrderLimitConfig) -> Self {
        self.config.order_limits = limits;
        self
    }

    pub fn with_max_charge_retries(mut self, retries: u32) -> Self {
        self.config.subscriptions.max_charge_retries = retries;
        self
    }

    pub fn with_retry_delay_days(mut self, days: i64) -> Self {
        self.config.subscriptions.retry_delay_days = days;
        self
    }

    pub fn with_provider_timeout_secs(mut self, secs: u64) -> Self {
        self.config.payments.provider_timeout_secs = secs;
        self
    }

    pub fn with_platform_fee_percent(mut self, percent: u32) -> Self {
        self.config.payments.platform_fee_percent = percent;
        self
    }

    pub fn with_min_popularity(mut self, stars: u32) -> Self {
        self.config.pledges.min_popularity = stars;
        self
    }

    pub fn with_dev_mode(mut self, enabled: bool) -> Self {
        self.config.dev.enabled = enabled;
        self
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables (with FUNDWAY_ prefix or without):
    /// - `LOG_LEVEL`, `LOG_JSON`
    /// - `MAX_CHARGE_RETRIES`, `RETRY_DELAY_DAYS`, `AMOUNT_GRANULARITY`
    /// - `PROVIDER_TIMEOUT_SECS`, `PLATFORM_FEE_PERCENT`, `PREPAID_VALIDITY_DAYS`
    /// - `PLEDGE_MIN_POPULARITY`
    /// - `DEV_MODE`
    /// - `ORDER_LIMITS_*` (see [`OrderLimitConfig::from_env`])
    pub fn from_env(mut self) -> Self {
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = parse_env_with_prefix("LOG_JSON") {
            self.config.logging.json = json;
        }

        let subs = &mut self.config.subscriptions;
        if let Some(val) = parse_env_with_prefix("MAX_CHARGE_RETRIES") {
            subs.max_charge_retries = val;
        }
        if let Some(val) = parse_env_with_prefix("RETRY_DELAY_DAYS") {
            subs.retry_delay_days = val;
        }
        match parse_env_with_prefix::<i64>("AMOUNT_GRANULARITY") {
            Some(val) if val > 0 => subs.amount_granularity = val,
            Some(val) => tracing::warn!(
                target: "fundway::config",
                value = val,
                "ignoring non-positive amount granularity"
            ),
            None => {}
        }

        let payments = &mut self.config.payments;
        if let Some(val) = parse_env_with_prefix("PROVIDER_TIMEOUT_SECS") {
            payments.provider_timeout_secs = val;
        }
        if let Some(val) = parse_env_with_prefix("PLATFORM_FEE_PERCENT") {
            payments.platform_fee_percent = val;
        }
        if let Some(val) = parse_env_with_prefix("PREPAID_VALIDITY_DAYS") {
            payments.prepaid_validity_days = val;
        }

        if let Some(val) = parse_env_with_prefix("PLEDGE_MIN_POPULARITY") {
            self.config.pledges.min_popularity = val;
        }
        if let Some(val) = parse_env_with_prefix("DEV_MODE") {
            self.config.dev.enabled = val;
        }

        self.config.order_limits = OrderLimitConfig::from_env();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.subscriptions.max_charge_retries, 6);
        assert_eq!(config.subscriptions.amount_granularity, 100);
        assert_eq!(config.payments.prepaid_validity_days, 365);
        assert_eq!(config.pledges.min_popularity, 100);
        assert!(!config.dev.is_dev_mode());
    }

    #[test]
    fn test_builder() {
        let config = ConfigBuilder::new()
            .with_max_charge_retries(3)
            .with_platform_fee_percent(10)
            .with_dev_mode(true)
            .build();

        assert_eq!(config.subscriptions.max_charge_retries, 3);
        assert_eq!(config.payments.platform_fee_percent, 10);
        assert!(config.dev.enabled);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: Config =
            serde_json::from_str(r#"{"subscriptions": {"max_charge_retries": 2}}"#).unwrap();
        assert_eq!(config.subscriptions.max_charge_retries, 2);
        assert_eq!(config.subscriptions.retry_delay_days, 2);
        assert_eq!(config.payments.provider_timeout_secs, 30);
    }

    #[test]
    fn test_deserialize_rejects_zero_granularity() {
        let result: Result<Config, _> =
            serde_json::from_str(r#"{"subscriptions": {"amount_granularity": 0}}"#);
        assert!(result.is_err());

        let config: Config =
            serde_json::from_str(r#"{"subscriptions": {"amount_granularity": 500}}"#).unwrap();
        assert_eq!(config.subscriptions.amount_granularity, 500);
    }

    #[test]
    fn test_from_env_ignores_zero_granularity() {
        unsafe {
            std::env::set_var("FUNDWAY_AMOUNT_GRANULARITY", "0");
        }
        let config = ConfigBuilder::new().from_env().build();
        assert_eq!(config.subscriptions.amount_granularity, 100);
        unsafe {
            std::env::remove_var("FUNDWAY_AMOUNT_GRANULARITY");
        }
    }

    #[test]
    fn test_from_env() {
        unsafe {
            std::env::set_var("FUNDWAY_PLEDGE_MIN_POPULARITY", "250");
        }
        let config = ConfigBuilder::new().from_env().build();
        assert_eq!(config.pledges.min_popularity, 250);
        unsafe {
            std::env::remove_var("FUNDWAY_PLEDGE_MIN_POPULARITY");
        }
    }
}
