use std::collections::{BTreeSet, HashMap};
use terra_core::QuadId;

/// Recency index over quads. Stamps are a monotonic visibility epoch, not
/// wall time; ties break on the quad id so ordering stays deterministic.
#[derive(Debug, Default)]
pub(crate) struct LruIndex {
    stamps: HashMap<QuadId, u64>,
    order: BTreeSet<(u64, QuadId)>,
}

impl LruIndex {
    /// Inserts `quad` or moves it forward. Stamps never go backwards.
    pub(crate) fn touch(&mut self, quad: QuadId, stamp: u64) -> bool {
        match self.stamps.get_mut(&quad) {
            Some(current) => {
                if stamp > *current {
                    self.order.remove(&(*current, quad));
                    self.order.insert((stamp, quad));
                    *current = stamp;
                }
                false
            }
            None => {
                self.stamps.insert(quad, stamp);
                self.order.insert((stamp, quad));
                true
            }
        }
    }

    pub(crate) fn remove(&mut self, quad: QuadId) -> bool {
        match self.stamps.remove(&quad) {
            Some(stamp) => {
                self.order.remove(&(stamp, quad));
                true
            }
            None => false,
        }
    }

    /// Least recently stamped quad for which `pinned` is false.
    pub(crate) fn oldest_unpinned(&self, pinned: impl Fn(&QuadId) -> bool) -> Option<QuadId> {
        self.order
            .iter()
            .map(|(_, quad)| *quad)
            .find(|quad| !pinned(quad))
    }

    pub(crate) fn contains(&self, quad: QuadId) -> bool {
        self.stamps.contains_key(&quad)
    }

    pub(crate) fn stamp(&self, quad: QuadId) -> Option<u64> {
        self.stamps.get(&quad).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.stamps.len()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = QuadId> + '_ {
        self.stamps.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_skips_pinned_entries() {
        let a = QuadId::new(1, 0, 0);
        let b = QuadId::new(1, 1, 0);
        let c = QuadId::new(1, 0, 1);
        let mut lru = LruIndex::default();
        lru.touch(a, 1);
        lru.touch(b, 2);
        lru.touch(c, 3);
        lru.touch(a, 4);

        assert_eq!(lru.oldest_unpinned(|_| false), Some(b));
        assert_eq!(lru.oldest_unpinned(|quad| *quad == b), Some(c));
        assert_eq!(lru.oldest_unpinned(|_| true), None);
    }

    #[test]
    fn stamps_do_not_go_backwards() {
        let a = QuadId::new(1, 0, 0);
        let mut lru = LruIndex::default();
        assert!(lru.touch(a, 5));
        assert!(!lru.touch(a, 2));
        assert_eq!(lru.stamp(a), Some(5));
        assert!(lru.remove(a));
        assert!(!lru.contains(a));
        assert_eq!(lru.len(), 0);
    }
}
