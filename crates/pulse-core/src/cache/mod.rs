//! Last-known-good value store.
//!
//! One entry per `(upstream_id, resource_key)`, overwritten on every successful fetch and never
//! evicted. Serving something old is preferred to serving nothing, so readers always get the
//! entry back and decide what to do with the computed [`CachedValue::stale`] flag.
//!
//! Entries are partitioned by upstream: the outer map is keyed by upstream id, so writes for
//! unrelated upstreams land on different shards.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    types::{NormalizedValue, ResourceKey},
    utils::clock::SharedClock,
};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: NormalizedValue,
    fetched_at: DateTime<Utc>,
    fetched_instant: Instant,
    ttl: Duration,
}

/// A value read back from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: NormalizedValue,
    pub fetched_at: DateTime<Utc>,
    /// `now - fetched_at > ttl`, evaluated at read time.
    pub stale: bool,
    pub age: Duration,
}

#[derive(Debug)]
pub struct SnapshotCache {
    entries: DashMap<Arc<str>, DashMap<ResourceKey, CacheEntry>>,
    clock: SharedClock,
}

impl SnapshotCache {
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self { entries: DashMap::new(), clock }
    }

    /// Stores a freshly fetched value, replacing any previous one.
    ///
    /// Returns the timestamp recorded as `fetched_at`.
    pub fn put(
        &self,
        upstream_id: &Arc<str>,
        key: &ResourceKey,
        value: NormalizedValue,
        ttl: Duration,
    ) -> DateTime<Utc> {
        let fetched_at = self.clock.utc_now();
        let entry = CacheEntry { value, fetched_at, fetched_instant: self.clock.now(), ttl };

        self.entries.entry(Arc::clone(upstream_id)).or_default().insert(key.clone(), entry);

        tracing::trace!(upstream = %upstream_id, resource = %key, "cache entry updated");
        fetched_at
    }

    #[must_use]
    pub fn get(&self, upstream_id: &str, key: &ResourceKey) -> Option<CachedValue> {
        let partition = self.entries.get(upstream_id)?;
        let entry = partition.get(key)?;
        let age = self.clock.now().saturating_duration_since(entry.fetched_instant);

        Some(CachedValue {
            value: entry.value.clone(),
            fetched_at: entry.fetched_at,
            stale: age > entry.ttl,
            age,
        })
    }

    /// Total number of entries across all upstreams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().map(|partition| partition.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
