//! Fundway - order and recurring-subscription lifecycle engine for donation
//! platforms
//!
//! Fundway validates funding requests, enforces abuse limits, attaches a
//! payment instrument, charges exactly once and then manages recurring
//! subscriptions: renewal scheduling, retries on failed charges, amount and
//! payment method changes, cancellation and refunds.
//!
//! # Features
//!
//! - **Orders**: validation, pledges to not-yet-onboarded accounts, free
//!   registrations, manual reconciliation, idempotent creation
//! - **Subscriptions**: versioned lineage, optimistic locking, retry/backoff
//! - **Rate limiting**: per-actor hourly counters on order creation
//! - **Refunds**: compensating ledger entries through the payment provider
//! - **Testing**: in-memory stores and mocks for every collaborator
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fundway::{ConfigBuilder, FundingService};
//! use fundway::testing::{MockPaymentProvider, StaticChallengeVerifier, StaticPopularityVerifier};
//!
//! fn main() -> fundway::Result<()> {
//!     fundway::init_tracing();
//!
//!     let config = ConfigBuilder::new().from_env().build();
//!     let service = FundingService::builder()
//!         .with_provider(Arc::new(MockPaymentProvider::new()))
//!         .with_popularity_verifier(Arc::new(StaticPopularityVerifier::new()))
//!         .with_challenge_verifier(Arc::new(StaticChallengeVerifier::accept_all()))
//!         .with_config(config)
//!         .build()?;
//!     # let _ = service;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
pub mod funding;
pub mod ratelimit;
pub mod testing;
pub mod traits;
mod utils;

// Re-exports for public API
pub use config::{
    Config, ConfigBuilder, DevConfig, LoggingConfig, PaymentConfig, PledgeConfig,
    SubscriptionConfig,
};
pub use error::{ErrorResponse, FundwayError, Result};
pub use funding::{FundingError, FundingService, FundingServiceBuilder};
pub use ratelimit::{OrderLimitConfig, OrderLimitConfigBuilder, OrderRateLimiter};
pub use traits::CounterStore;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in your application, typically in main().
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "fundway::orders=debug")
/// - `FUNDWAY_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = utils::parse_env_with_prefix::<bool>("LOG_JSON").unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing with a custom configuration
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::new(&config.logging.level);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
