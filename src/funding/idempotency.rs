//! Idempotency keys for order creation.
//!
//! A key is claimed before any work starts. A duplicate request with a
//! completed key gets the original order back; one whose first attempt is
//! still running is rejected.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of claiming a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyClaim {
    /// First time this key is seen; the caller owns it now.
    Claimed,
    /// Another request holds the key.
    InFlight,
    /// A request with this key already produced `order_id`.
    Completed(Uuid),
}

/// Trait for storing idempotency keys.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claim `key`.
    async fn claim(&self, key: &str) -> Result<IdempotencyClaim>;

    /// Record the order produced under `key`.
    async fn complete(&self, key: &str, order_id: Uuid) -> Result<()>;

    /// Forget a claimed key so the request can be retried.
    async fn release(&self, key: &str) -> Result<()>;
}

/// In-memory idempotency store (for development/testing)
///
/// In production, use a database-backed store with a unique key column.
#[derive(Clone, Default)]
pub struct MemoryIdempotencyStore {
    keys: Arc<RwLock<HashMap<String, Option<Uuid>>>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn claim(&self, key: &str) -> Result<IdempotencyClaim> {
        let mut keys = self.keys.write().await;
        match keys.get(key) {
            Some(Some(order_id)) => Ok(IdempotencyClaim::Completed(*order_id)),
            Some(None) => Ok(IdempotencyClaim::InFlight),
            None => {
                keys.insert(key.to_string(), None);
                Ok(IdempotencyClaim::Claimed)
            }
        }
    }

    async fn complete(&self, key: &str, order_id: Uuid) -> Result<()> {
        self.keys
            .write()
            .await
            .insert(key.to_string(), Some(order_id));
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut keys = self.keys.write().await;
        if matches!(keys.get(key), Some(None)) {
            keys.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_lifecycle() {
        let store = MemoryIdempotencyStore::new();
        assert_eq!(store.claim("k").await.unwrap(), IdempotencyClaim::Claimed);
        assert_eq!(store.claim("k").await.unwrap(), IdempotencyClaim::InFlight);

        let order_id = Uuid::new_v4();
        store.complete("k", order_id).await.unwrap();
        assert_eq!(
            store.claim("k").await.unwrap(),
            IdempotencyClaim::Completed(order_id)
        );
    }

    #[tokio::test]
    async fn test_release_allows_retry() {
        let store = MemoryIdempotencyStore::new();
        store.claim("k").await.unwrap();
        store.release("k").await.unwrap();
        assert_eq!(store.claim("k").await.unwrap(), IdempotencyClaim::Claimed);
    }

    #[tokio::test]
    async fn test_release_keeps_completed_keys() {
        let store = MemoryIdempotencyStore::new();
        store.claim("k").await.unwrap();
        let order_id = Uuid::new_v4();
        store.complete("k", order_id).await.unwrap();
        store.release("k").await.unwrap();
        assert_eq!(
            store.claim("k").await.unwrap(),
            IdempotencyClaim::Completed(order_id)
        );
    }
}
