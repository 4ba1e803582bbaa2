use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use terra_core::{QuadId, QuadRecord};
use thiserror::Error;

use crate::lru::LruIndex;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("RAM cache is full and all {capacity} cached quads are in view")]
    CapacityExceeded { capacity: usize },
}

#[derive(Debug, Clone)]
struct CachedQuad {
    record: Arc<QuadRecord>,
    received_at: Instant,
}

/// Completed quads held in memory, bounded by `capacity`.
///
/// Eviction is least-recently-visible first and never picks a pinned (in
/// view) quad. When only pinned quads remain the insert is refused.
#[derive(Debug)]
pub struct RamCache {
    capacity: usize,
    entries: HashMap<QuadId, CachedQuad>,
    recency: LruIndex,
}

impl RamCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: LruIndex::default(),
        }
    }

    /// Stores `record`, evicting at most one unpinned quad to make room.
    /// Replacing a cached quad never evicts. Returns the evicted quad.
    pub fn insert(
        &mut self,
        record: Arc<QuadRecord>,
        stamp: u64,
        now: Instant,
        pinned: impl Fn(&QuadId) -> bool,
    ) -> Result<Option<QuadId>, CacheError> {
        let id = record.id;
        let mut evicted = None;
        if !self.entries.contains_key(&id) && self.entries.len() >= self.capacity {
            let victim = self
                .recency
                .oldest_unpinned(|quad| *quad == id || pinned(quad))
                .ok_or(CacheError::CapacityExceeded {
                    capacity: self.capacity,
                })?;
            self.remove(victim);
            evicted = Some(victim);
        }
        self.entries.insert(
            id,
            CachedQuad {
                record,
                received_at: now,
            },
        );
        self.recency.touch(id, stamp);
        Ok(evicted)
    }

    /// Marks `quad` as visible at `stamp`. Unknown quads are ignored.
    pub fn touch(&mut self, quad: QuadId, stamp: u64) {
        if self.entries.contains_key(&quad) {
            self.recency.touch(quad, stamp);
        }
    }

    pub fn remove(&mut self, quad: QuadId) -> Option<Arc<QuadRecord>> {
        self.recency.remove(quad);
        self.entries.remove(&quad).map(|entry| entry.record)
    }

    pub fn get(&self, quad: QuadId) -> Option<&Arc<QuadRecord>> {
        self.entries.get(&quad).map(|entry| &entry.record)
    }

    pub fn received_at(&self, quad: QuadId) -> Option<Instant> {
        self.entries.get(&quad).map(|entry| entry.received_at)
    }

    pub fn last_visible(&self, quad: QuadId) -> Option<u64> {
        self.recency.stamp(quad)
    }

    pub fn contains(&self, quad: QuadId) -> bool {
        self.entries.contains_key(&quad)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Full, and no cached quad could be evicted.
    pub fn is_pinned_full(&self, pinned: impl Fn(&QuadId) -> bool) -> bool {
        self.is_full() && self.recency.oldest_unpinned(pinned).is_none()
    }

    pub fn ids(&self) -> impl Iterator<Item = QuadId> + '_ {
        self.recency.ids()
    }
}
