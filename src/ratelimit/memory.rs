//! In-process counter store backed by dashmap
//!
//! Suitable for a single instance or tests. Multi-instance deployments should
//! use a shared backend so every node sees the same counts.

use crate::error::Result;
use crate::traits::counter::CounterStore;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Purge expired counters every N increments.
const PURGE_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory implementation of [`CounterStore`]
///
/// The dashmap entry lock makes each increment atomic per key.
#[derive(Clone, Default)]
pub struct InMemoryCounterStore {
    counters: Arc<DashMap<String, CounterEntry>>,
    operations: Arc<AtomicU64>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live counters, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn purge_expired(&self, now: Instant) {
        self.counters.retain(|_, entry| !entry.is_expired(now));
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64> {
        let now = Instant::now();

        let ops = self.operations.fetch_add(1, Ordering::Relaxed);
        if ops % PURGE_INTERVAL == 0 && ops > 0 {
            self.purge_expired(now);
        }

        let previous = match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = CounterEntry {
                        count: 1,
                        expires_at: now + window,
                    };
                    0
                } else {
                    let previous = entry.count;
                    entry.count = entry.count.saturating_add(1);
                    previous
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CounterEntry {
                    count: 1,
                    expires_at: now + window,
                });
                0
            }
        };

        Ok(previous)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count)
            .unwrap_or(0))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.counters.remove(key);
        Ok(())
    }
}
