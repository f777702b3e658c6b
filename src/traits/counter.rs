//! Counter trait for shared, expiring attempt counters
//!
//! Backs the order rate limiter. Implementations may be in-process or a
//! shared cache such as Redis (`INCR` + `EXPIRE NX`).

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Key-value counter with atomic increment-and-expire
///
/// Counters are loosely consistent: a backend may under-count by the number
/// of concurrent writers, but a single `increment` call must never lose its
/// own write.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key` and return the value it held *before*
    /// this increment.
    ///
    /// When the key does not exist it is created with a value of one and an
    /// expiry of `window`. The expiry of an existing key is never extended,
    /// so a counter cannot reset in the middle of its window.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64>;

    /// Read the current value without incrementing.
    async fn get(&self, key: &str) -> Result<u64>;

    /// Remove a counter.
    async fn reset(&self, key: &str) -> Result<()>;
}
