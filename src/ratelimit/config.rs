use serde::{Deserialize, Serialize};
use crate::utils::parse_env_with_prefix;

/// Order-creation limits, counted per actor key over a fixed window.
///
/// Each threshold is the number of attempts allowed inside one window;
/// the attempt after that is rejected.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct OrderLimitConfig {
    /// Whether order limits are enforced at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Window length in seconds (one hour)
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Attempts per authenticated source account
    #[serde(default = "default_per_account")]
    pub per_account: u64,

    /// Attempts per source account towards a single destination
    #[serde(default = "default_per_account_destination")]
    pub per_account_destination: u64,

    /// Attempts per submitted email (anonymous requests)
    #[serde(default = "default_per_email")]
    pub per_email: u64,

    /// Attempts per submitted email towards a single destination
    #[serde(default = "default_per_email_destination")]
    pub per_email_destination: u64,

    /// Attempts per source address (anonymous requests)
    #[serde(default = "default_per_ip")]
    pub per_ip: u64,

    /// Attempts per source address towards a single destination
    #[serde(default = "default_per_ip_destination")]
    pub per_ip_destination: u64,
}

impl Default for OrderLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            window_seconds: default_window_seconds(),
            per_account: default_per_account(),
            per_account_destination: default_per_account_destination(),
            per_email: default_per_email(),
            per_email_destination: default_per_email_destination(),
            per_ip: default_per_ip(),
            per_ip_destination: default_per_ip_destination(),
        }
    }
}

impl OrderLimitConfig {
    /// Create a new OrderLimitConfig builder
    pub fn builder() -> OrderLimitConfigBuilder {
        OrderLimitConfigBuilder::new()
    }

    /// Limits high enough to never trip in local development
    pub fn permissive() -> Self {
        Self {
            enabled: true,
            window_seconds: default_window_seconds(),
            per_account: 10_000,
            per_account_destination: 10_000,
            per_email: 10_000,
            per_email_destination: 10_000,
            per_ip: 10_000,
            per_ip_destination: 10_000,
        }
    }

    /// Load order limits from environment variables
    ///
    /// - `FUNDWAY_ORDER_LIMITS_ENABLED`
    /// - `FUNDWAY_ORDER_LIMITS_WINDOW_SECONDS`
    /// - `FUNDWAY_ORDER_LIMITS_PER_ACCOUNT`, `..._PER_ACCOUNT_DESTINATION`
    /// - `FUNDWAY_ORDER_LIMITS_PER_EMAIL`, `..._PER_EMAIL_DESTINATION`
    /// - `FUNDWAY_ORDER_LIMITS_PER_IP`, `..._PER_IP_DESTINATION`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(enabled) = parse_env_with_prefix("ORDER_LIMITS_ENABLED") {
            config.enabled = enabled;
        }
        if let Some(val) = parse_env_with_prefix("ORDER_LIMITS_WINDOW_SECONDS") {
            config.window_seconds = val;
        }
        if let Some(val) = parse_env_with_prefix("ORDER_LIMITS_PER_ACCOUNT") {
            config.per_account = val;
        }
        if let Some(val) = parse_env_with_prefix("ORDER_LIMITS_PER_ACCOUNT_DESTINATION") {
            config.per_account_destination = val;
        }
        if let Some(val) = parse_env_with_prefix("ORDER_LIMITS_PER_EMAIL") {
            config.per_email = val;
        }
        if let Some(val) = parse_env_with_prefix("ORDER_LIMITS_PER_EMAIL_DESTINATION") {
            config.per_email_destination = val;
        }
        if let Some(val) = parse_env_with_prefix("ORDER_LIMITS_PER_IP") {
            config.per_ip = val;
        }
        if let Some(val) = parse_env_with_prefix("ORDER_LIMITS_PER_IP_DESTINATION") {
            config.per_ip_destination = val;
        }

        config
    }
}

/// Builder for OrderLimitConfig
#[must_use = "builder does nothing until you call build()"]
pub struct OrderLimitConfigBuilder {
    config: OrderLimitConfig,
}

impl OrderLimitConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: OrderLimitConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn window_seconds(mut self, seconds: u64) -> Self {
        self.config.window_seconds = seconds;
        self
    }

    pub fn per_account(mut self, max: u64) -> Self {
        self.config.per_account = max;
        self
    }

    pub fn per_account_destination(mut self, max: u64) -> Self {
        self.config.per_account_destination = max;
        self
    }

    pub fn per_email(mut self, max: u64) -> Self {
        self.config.per_email = max;
        self
    }

    pub fn per_email_destination(mut self, max: u64) -> Self {
        self.config.per_email_destination = max;
        self
    }

    pub fn per_ip(mut self, max: u64) -> Self {
        self.config.per_ip = max;
        self
    }

    pub fn per_ip_destination(mut self, max: u64) -> Self {
        self.config.per_ip_destination = max;
        self
    }

    pub fn build(self) -> OrderLimitConfig {
        self.config
    }
}

impl Default for OrderLimitConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_enabled() -> bool {
    true
}

fn default_window_seconds() -> u64 {
    3600
}

fn default_per_account() -> u64 {
    50
}

fn default_per_account_destination() -> u64 {
    10
}

fn default_per_email() -> u64 {
    10
}

fn default_per_email_destination() -> u64 {
    5
}

fn default_per_ip() -> u64 {
    10
}

fn default_per_ip_destination() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrderLimitConfig::default();
        assert!(config.enabled);
        assert_eq!(config.window_seconds, 3600);
        assert_eq!(config.per_account, 50);
        assert_eq!(config.per_ip_destination, 5);
    }

    #[test]
    fn test_builder() {
        let config = OrderLimitConfig::builder()
            .per_account(3)
            .per_email(2)
            .per_ip(1)
            .window_seconds(60)
            .build();

        assert_eq!(config.per_account, 3);
        assert_eq!(config.per_email, 2);
        assert_eq!(config.per_ip, 1);
        assert_eq!(config.window_seconds, 60);
        assert_eq!(config.per_email_destination, 5);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: OrderLimitConfig = serde_json::from_str(r#"{"per_ip": 2}"#).unwrap();
        assert_eq!(config.per_ip, 2);
        assert_eq!(config.per_account, 50);
        assert!(config.enabled);
    }
}
