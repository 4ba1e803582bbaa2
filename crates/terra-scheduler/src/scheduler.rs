use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use terra_config::SchedulerConfig;
use terra_core::{QuadId, QuadRecord, TileId};
use tracing::{debug, info, warn};

use crate::cache::{CacheError, RamCache};
use crate::gpu_cache::{GpuCache, GpuDelta};

/// Result of one demand recomputation.
#[derive(Debug, Default)]
pub struct Demand {
    /// Quads to submit for loading, coarsest first.
    pub requests: Vec<QuadId>,
    pub delta: GpuDelta,
}

/// Owns camera-driven demand, the RAM cache and the GPU residency mirror.
///
/// Visibility is tracked with an epoch bumped on every [`Scheduler::update`];
/// a quad's "last visible" stamp is the latest epoch it was desired in.
#[derive(Debug)]
pub struct Scheduler {
    ram: RamCache,
    gpu: GpuCache,
    desired: HashSet<QuadId>,
    epoch: u64,
    online: bool,
    failed_quad_retry: Duration,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            ram: RamCache::new(config.ram_quad_limit),
            gpu: GpuCache::new(config.gpu_quad_limit),
            desired: HashSet::new(),
            epoch: 0,
            online: true,
            failed_quad_retry: config.failed_quad_retry(),
        }
    }

    /// Replaces the desired set with the parents of `needed_tiles` and
    /// returns what to request plus the resulting GPU changes. Quads for
    /// which `in_flight` is true are never requested again.
    pub fn update(
        &mut self,
        needed_tiles: &HashSet<TileId>,
        now: Instant,
        in_flight: impl Fn(&QuadId) -> bool,
    ) -> Demand {
        self.epoch += 1;
        self.desired = needed_tiles.iter().filter_map(TileId::parent).collect();
        for quad in &self.desired {
            self.ram.touch(*quad, self.epoch);
            self.gpu.touch(*quad, self.epoch);
        }

        let delta = self.sync_gpu();
        let requests = self.requests(now, in_flight);
        Demand { requests, delta }
    }

    /// Caches a finished quad. A refusal leaves the cache untouched.
    pub fn receive_quad(&mut self, record: QuadRecord, now: Instant) -> Result<GpuDelta, CacheError> {
        let id = record.id;
        let record = Arc::new(record);
        let replaced = self.ram.contains(id);
        let desired = &self.desired;

        let evicted = match self
            .ram
            .insert(record.clone(), self.epoch, now, |quad| desired.contains(quad))
        {
            Ok(evicted) => evicted,
            Err(err) => {
                warn!(quad = %id, error = %err, "quad refused by RAM cache");
                return Err(err);
            }
        };

        let mut delta = GpuDelta::default();
        if let Some(evicted) = evicted {
            debug!(quad = %evicted, "evicted quad from RAM cache");
            if self.gpu.remove(evicted) {
                delta.push_removed(evicted);
            }
        }
        if replaced && self.gpu.contains(id) {
            delta.push_removed(id);
            delta.push_added(record);
        } else if self.desired.contains(&id) {
            self.upload(id, &mut delta);
        }
        Ok(delta)
    }

    /// Returns true when reachability changed.
    pub fn set_online(&mut self, online: bool) -> bool {
        if self.online == online {
            return false;
        }
        self.online = online;
        info!(online, "network reachability changed");
        true
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn desired(&self) -> &HashSet<QuadId> {
        &self.desired
    }

    pub fn ram_cache(&self) -> &RamCache {
        &self.ram
    }

    pub fn gpu(&self) -> &GpuCache {
        &self.gpu
    }

    fn requests(&self, now: Instant, in_flight: impl Fn(&QuadId) -> bool) -> Vec<QuadId> {
        if !self.online {
            return Vec::new();
        }
        let desired = &self.desired;
        let pinned_full = self.ram.is_pinned_full(|quad| desired.contains(quad));
        if pinned_full {
            debug!(
                cached = self.ram.len(),
                "RAM cache pinned by current view, not requesting new quads"
            );
        }

        let mut requests: Vec<QuadId> = desired
            .iter()
            .copied()
            .filter(|quad| !in_flight(quad))
            .filter(|quad| match self.ram.get(*quad) {
                None => !pinned_full,
                Some(record) => self.is_stale(*quad, record, now),
            })
            .collect();
        requests.sort_by_key(|quad| coarse_first(*quad));
        requests
    }

    fn is_stale(&self, quad: QuadId, record: &QuadRecord, now: Instant) -> bool {
        record.has_network_failure()
            && self
                .ram
                .received_at(quad)
                .is_some_and(|at| now.saturating_duration_since(at) >= self.failed_quad_retry)
    }

    fn sync_gpu(&mut self) -> GpuDelta {
        let mut candidates: Vec<QuadId> = self
            .desired
            .iter()
            .copied()
            .filter(|quad| self.ram.contains(*quad) && !self.gpu.contains(*quad))
            .collect();
        candidates.sort_by_key(|quad| coarse_first(*quad));

        let mut delta = GpuDelta::default();
        for quad in candidates {
            if !self.upload(quad, &mut delta) {
                debug!(
                    resident = self.gpu.len(),
                    "GPU set pinned by current view, deferring uploads"
                );
                break;
            }
        }
        delta
    }

    /// Makes a cached quad resident, displacing the least recently visible
    /// resident quad that is out of view when the GPU set is full.
    fn upload(&mut self, quad: QuadId, delta: &mut GpuDelta) -> bool {
        let Some(record) = self.ram.get(quad).cloned() else {
            return false;
        };
        if self.gpu.contains(quad) {
            return true;
        }
        if self.gpu.len() >= self.gpu.limit() {
            let desired = &self.desired;
            let Some(victim) = self.gpu.oldest_unpinned(|resident| desired.contains(resident)) else {
                return false;
            };
            self.gpu.remove(victim);
            delta.push_removed(victim);
        }
        self.gpu.insert(quad, self.epoch);
        delta.push_added(record);
        true
    }
}

fn coarse_first(quad: QuadId) -> (u8, u32, u32) {
    (quad.zoom, quad.x, quad.y)
}
