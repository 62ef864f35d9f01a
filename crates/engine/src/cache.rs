//! Snapshot caches
//!
//! [`MemorySnapshotCache`] keeps snapshots in a DashMap keyed by
//! [`SnapshotKey`], plus a per-entity index so a write can drop every
//! snapshot of the entity it touched without scanning the whole map.
//!
//! Invalidation is coarse: a single fact change can move the derived window
//! of any snapshot of the entity, so nothing is ever patched in place.
//!
//! A read that computed its snapshot before a concurrent write committed may
//! repopulate a stale entry after that write's invalidation. The entry lives
//! until the next invalidation of the entity.
//!
//! A full cache evicts an arbitrary entry to make room. Concurrent puts may
//! briefly overshoot the capacity by the number of racing writers.

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tempora_core::{CacheError, EntityId, ObjectSnapshot, SnapshotCache, SnapshotKey};
use tracing::trace;

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a snapshot
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Snapshots dropped to make room
    pub evictions: u64,
    /// Snapshots currently held
    pub entries: usize,
}

/// Bounded in-memory [`SnapshotCache`]
pub struct MemorySnapshotCache {
    entries: DashMap<SnapshotKey, ObjectSnapshot>,
    by_entity: DashMap<EntityId, FxHashSet<SnapshotKey>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemorySnapshotCache {
    /// Create a cache holding at most `capacity` snapshots
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            by_entity: DashMap::new(),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Number of entities with at least one cached snapshot
    pub fn entity_count(&self) -> usize {
        self.by_entity.len()
    }

    /// Number of cached snapshots
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of snapshots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop everything
    pub fn clear(&self) {
        self.by_entity.clear();
        self.entries.clear();
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Drop one entry and its index slot
    fn evict_one(&self) -> bool {
        // Clone the key first; removing while iterating would deadlock the shard.
        let Some(victim) = self.entries.iter().next().map(|e| e.key().clone()) else {
            return false;
        };
        self.entries.remove(&victim);
        if let Some(mut keys) = self.by_entity.get_mut(&victim.entity) {
            keys.remove(&victim);
        }
        self.by_entity
            .remove_if(&victim.entity, |_, keys| keys.is_empty());
        self.evictions.fetch_add(1, Ordering::Relaxed);
        trace!(target: "tempora::cache", entity = %victim.entity, "evicted");
        true
    }
}

impl SnapshotCache for MemorySnapshotCache {
    fn get(&self, key: &SnapshotKey) -> Option<ObjectSnapshot> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, key: SnapshotKey, snapshot: ObjectSnapshot) -> Result<(), CacheError> {
        if self.capacity == 0 {
            return Err(CacheError::CapacityExceeded(0));
        }
        while !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            if !self.evict_one() {
                break;
            }
        }

        // Hold the index entry while inserting so invalidate() for the same
        // entity cannot interleave between the two maps.
        let mut keys = self.by_entity.entry(key.entity).or_default();
        keys.insert(key.clone());
        self.entries.insert(key, snapshot);
        Ok(())
    }

    fn invalidate(&self, entity: EntityId) {
        if let Some((_, keys)) = self.by_entity.remove(&entity) {
            let dropped = keys.len();
            for key in keys {
                self.entries.remove(&key);
            }
            trace!(target: "tempora::cache", entity = %entity, dropped, "invalidated");
        }
    }
}

/// Cache that never holds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl SnapshotCache for NoopCache {
    fn get(&self, _key: &SnapshotKey) -> Option<ObjectSnapshot> {
        None
    }

    fn put(&self, _key: SnapshotKey, _snapshot: ObjectSnapshot) -> Result<(), CacheError> {
        Ok(())
    }

    fn invalidate(&self, _entity: EntityId) {}
}
