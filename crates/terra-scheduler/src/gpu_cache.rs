use std::sync::Arc;
use terra_core::{QuadId, QuadRecord};

use crate::lru::LruIndex;

/// Change to the GPU-resident quad set.
///
/// Apply `removed` before `added`: a quad whose record was replaced shows up
/// in both.
#[derive(Debug, Clone, Default)]
pub struct GpuDelta {
    pub removed: Vec<QuadId>,
    pub added: Vec<Arc<QuadRecord>>,
}

impl GpuDelta {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    pub fn push_added(&mut self, record: Arc<QuadRecord>) {
        self.added.retain(|known| known.id != record.id);
        self.added.push(record);
    }

    /// Removing a quad added earlier in the same delta cancels that add.
    pub fn push_removed(&mut self, quad: QuadId) {
        let before = self.added.len();
        self.added.retain(|known| known.id != quad);
        if self.added.len() == before && !self.removed.contains(&quad) {
            self.removed.push(quad);
        }
    }

    /// Folds a later delta into this one.
    pub fn merge(&mut self, later: GpuDelta) {
        for quad in later.removed {
            self.push_removed(quad);
        }
        for record in later.added {
            self.push_added(record);
        }
    }

    pub fn added_ids(&self) -> impl Iterator<Item = QuadId> + '_ {
        self.added.iter().map(|record| record.id)
    }
}

/// Mirror of the quads the renderer holds on the GPU.
#[derive(Debug)]
pub struct GpuCache {
    limit: usize,
    resident: LruIndex,
}

impl GpuCache {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            resident: LruIndex::default(),
        }
    }

    /// Returns true when `quad` was not resident before.
    pub fn insert(&mut self, quad: QuadId, stamp: u64) -> bool {
        self.resident.touch(quad, stamp)
    }

    pub fn touch(&mut self, quad: QuadId, stamp: u64) {
        if self.resident.contains(quad) {
            self.resident.touch(quad, stamp);
        }
    }

    pub fn remove(&mut self, quad: QuadId) -> bool {
        self.resident.remove(quad)
    }

    /// Oldest resident quad that is not pinned.
    pub fn oldest_unpinned(&self, pinned: impl Fn(&QuadId) -> bool) -> Option<QuadId> {
        self.resident.oldest_unpinned(pinned)
    }

    pub fn contains(&self, quad: QuadId) -> bool {
        self.resident.contains(quad)
    }

    pub fn len(&self) -> usize {
        self.resident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resident.len() == 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn ids(&self) -> impl Iterator<Item = QuadId> + '_ {
        self.resident.ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(x: u32) -> Arc<QuadRecord> {
        Arc::new(QuadRecord::new(QuadId::new(4, x, 0), Vec::new()))
    }

    #[test]
    fn remove_cancels_an_add_from_the_same_delta() {
        let mut delta = GpuDelta::default();
        delta.push_added(record(1));
        delta.push_removed(record(1).id);
        assert!(delta.is_empty());
    }

    #[test]
    fn replacement_keeps_remove_then_add() {
        let mut delta = GpuDelta::default();
        delta.push_removed(record(1).id);
        delta.push_added(record(1));
        assert_eq!(delta.removed, vec![record(1).id]);
        assert_eq!(delta.added_ids().collect::<Vec<_>>(), vec![record(1).id]);

        let mut later = GpuDelta::default();
        later.push_removed(record(1).id);
        delta.merge(later);
        assert_eq!(delta.removed, vec![record(1).id]);
        assert!(delta.added.is_empty());
    }

    #[test]
    fn residency_tracks_inserts_and_removals() {
        let mut gpu = GpuCache::new(2);
        assert!(gpu.insert(record(1).id, 1));
        assert!(!gpu.insert(record(1).id, 2));
        assert!(gpu.insert(record(2).id, 3));
        assert_eq!(gpu.oldest_unpinned(|_| false), Some(record(1).id));
        gpu.touch(record(1).id, 4);
        assert_eq!(gpu.oldest_unpinned(|_| false), Some(record(2).id));
        assert!(gpu.remove(record(2).id));
        assert_eq!(gpu.len(), 1);
    }
}
