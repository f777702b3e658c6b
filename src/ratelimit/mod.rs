//! Order-creation rate limiting.

mod config;
mod limiter;
pub mod memory;

pub use config::{OrderLimitConfig, OrderLimitConfigBuilder};
pub use limiter::{ActorKey, ActorNamespace, OrderAttempt, OrderRateLimiter, hash_identity};
pub use memory::InMemoryCounterStore;
