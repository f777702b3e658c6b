//! Order-creation rate limiting.
//!
//! Counts order attempts per actor key inside a fixed window and rejects an
//! attempt once any key has already reached its threshold. Every attempt is
//! counted, including rejected ones, and counters are never rolled back when
//! a later step of order creation fails.
//!
//! # Tracing Events
//!
//! - `fundway::ratelimit` `order limit exceeded` - attempt rejected

use super::config::OrderLimitConfig;
use crate::error::{FundwayError, Result};
use crate::traits::counter::CounterStore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Prefix shared by all order-limit counter keys.
const KEY_PREFIX: &str = "order_limit";

/// The abuse vector a counter tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorNamespace {
    Account,
    AccountDestination,
    Email,
    EmailDestination,
    Ip,
    IpDestination,
}

impl ActorNamespace {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::AccountDestination => "account_destination",
            Self::Email => "email",
            Self::EmailDestination => "email_destination",
            Self::Ip => "ip",
            Self::IpDestination => "ip_destination",
        }
    }
}

impl fmt::Display for ActorNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One counter checked for an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorKey {
    pub namespace: ActorNamespace,
    pub identity: String,
    pub threshold: u64,
}

impl ActorKey {
    pub fn new(namespace: ActorNamespace, identity: impl Into<String>, threshold: u64) -> Self {
        Self {
            namespace,
            identity: identity.into(),
            threshold,
        }
    }

    /// Key under which the counter is stored.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}:{}:{}", KEY_PREFIX, self.namespace, self.identity)
    }
}

/// Identity facts about an order attempt, used to derive actor keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderAttempt<'a> {
    /// Account placing the order, when the requester is authenticated.
    pub account_id: Option<Uuid>,
    /// Email submitted with an anonymous request.
    pub email: Option<&'a str>,
    /// Source address of the request.
    pub ip: Option<&'a str>,
    /// Account receiving the funds: its id, or the normalized external
    /// handle of a pledge.
    pub destination: Option<&'a str>,
}

/// Hash an identity so raw emails and addresses never reach the counter store.
#[must_use]
pub fn hash_identity(value: &str) -> String {
    let digest = Sha256::digest(value.trim().to_lowercase().as_bytes());
    hex::encode(digest)
}

/// Rate limiter for order creation.
#[derive(Clone)]
pub struct OrderRateLimiter {
    store: Arc<dyn CounterStore>,
    config: OrderLimitConfig,
}

impl OrderRateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: OrderLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &OrderLimitConfig {
        &self.config
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_seconds)
    }

    /// Derive the actor keys for an attempt.
    ///
    /// Authenticated attempts are keyed by account; anonymous ones by email
    /// hash and source-address hash. Each identity also gets a key combined
    /// with the destination.
    #[must_use]
    pub fn keys_for(&self, attempt: &OrderAttempt<'_>) -> Vec<ActorKey> {
        let cfg = &self.config;
        let mut keys = Vec::new();

        if let Some(account_id) = attempt.account_id {
            keys.push(ActorKey::new(
                ActorNamespace::Account,
                account_id.to_string(),
                cfg.per_account,
            ));
            if let Some(dest) = attempt.destination {
                keys.push(ActorKey::new(
                    ActorNamespace::AccountDestination,
                    format!("{}:{}", account_id, dest),
                    cfg.per_account_destination,
                ));
            }
            return keys;
        }

        if let Some(email) = attempt.email.filter(|e| !e.trim().is_empty()) {
            let hashed = hash_identity(email);
            if let Some(dest) = attempt.destination {
                keys.push(ActorKey::new(
                    ActorNamespace::EmailDestination,
                    format!("{}:{}", hashed, dest),
                    cfg.per_email_destination,
                ));
            }
            keys.push(ActorKey::new(ActorNamespace::Email, hashed, cfg.per_email));
        }

        if let Some(ip) = attempt.ip.filter(|ip| !ip.trim().is_empty()) {
            let hashed = hash_identity(ip);
            if let Some(dest) = attempt.destination {
                keys.push(ActorKey::new(
                    ActorNamespace::IpDestination,
                    format!("{}:{}", hashed, dest),
                    cfg.per_ip_destination,
                ));
            }
            keys.push(ActorKey::new(ActorNamespace::Ip, hashed, cfg.per_ip));
        }

        keys
    }

    /// Count the attempt against every key and reject if any key had
    /// already reached its threshold.
    ///
    /// All keys are incremented even when an earlier one trips.
    pub async fn check(&self, keys: &[ActorKey]) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let window = self.window();
        let mut exceeded: Option<&ActorKey> = None;

        for key in keys {
            let previous = self.store.increment(&key.storage_key(), window).await?;
            if previous >= key.threshold && exceeded.is_none() {
                exceeded = Some(key);
            }
        }

        match exceeded {
            None => Ok(()),
            Some(key) => {
                tracing::warn!(
                    target: "fundway::ratelimit",
                    namespace = %key.namespace,
                    threshold = key.threshold,
                    window_secs = self.config.window_seconds,
                    "order limit exceeded"
                );
                Err(FundwayError::limit_exceeded(format!(
                    "Too many orders ({}). Please try again later.",
                    key.namespace
                )))
            }
        }
    }

    /// Derive keys for an attempt and check them.
    pub async fn check_attempt(&self, attempt: &OrderAttempt<'_>) -> Result<()> {
        let keys = self.keys_for(attempt);
        self.check(&keys).await
    }
}
