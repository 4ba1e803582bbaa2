use std::time::Instant;
use terra_config::{ConfigError, SchedulerConfig};
use terra_core::{FetchOutcome, Layer, QuadId, QuadRecord, TileId};
use terra_geo::{CameraState, Culling, TileCoverage};
use tracing::debug;

use crate::cache::CacheError;
use crate::gpu_cache::GpuDelta;
use crate::layer_assembler::{FetchRequest, LayerAssembler, LayerLoad};
use crate::quad_assembler::{QuadAssembler, QuadLoad};
use crate::rate_limiter::RateLimiter;
use crate::scheduler::Scheduler;
use crate::slot_limiter::{SlotLimiter, Stage};

/// What the owner of a [`Pipeline`] has to act on after a call.
#[derive(Debug, Default)]
pub struct Effects {
    /// Loader calls to start. Each must be answered through
    /// [`Pipeline::deliver_layer`] exactly once.
    pub fetches: Vec<FetchRequest>,
    pub delta: GpuDelta,
    /// Quads that finished assembling during this call.
    pub completed: Vec<QuadId>,
    /// Finished quads the RAM cache refused.
    pub refused: Vec<QuadId>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty()
            && self.delta.is_empty()
            && self.completed.is_empty()
            && self.refused.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub desired_quads: usize,
    pub cached_quads: usize,
    pub gpu_quads: usize,
    pub in_flight_quads: usize,
    pub queued_quads: usize,
    pub rate_limited_quads: usize,
    pub loading_tiles: usize,
}

/// The whole request pipeline as one synchronous state machine.
///
/// Nothing here performs IO or reads a clock. Callers feed camera changes,
/// loader results and the current time, and carry out the returned
/// [`Effects`]. Each call runs to completion, so stages never observe each
/// other half-updated.
pub struct Pipeline<C> {
    culling: C,
    scheduler: Scheduler,
    slots: SlotLimiter,
    rate: RateLimiter,
    quads: QuadAssembler,
    layers: LayerAssembler,
    camera: Option<CameraState>,
}

impl<C: Culling> Pipeline<C> {
    pub fn new(
        config: &SchedulerConfig,
        culling: C,
        coverage: TileCoverage,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let coverage = TileCoverage {
            max_zoom: coverage.max_zoom.min(config.max_zoom),
            ..coverage
        };
        Ok(Self {
            culling,
            scheduler: Scheduler::new(config),
            slots: SlotLimiter::new(config.max_concurrent_quads),
            rate: RateLimiter::new(config.max_requests_per_second),
            quads: QuadAssembler::new(coverage),
            layers: LayerAssembler::new(config.enabled_layers),
            camera: None,
        })
    }

    pub fn update_camera(&mut self, camera: &CameraState, now: Instant) -> Effects {
        self.camera = Some(*camera);
        let needed = self.culling.needed_tiles(camera);

        let slots = &self.slots;
        let demand = self
            .scheduler
            .update(&needed, now, |quad| slots.contains(quad));

        let desired = self.scheduler.desired();
        let dropped = self.slots.retain_queued(|quad| desired.contains(quad));
        if dropped > 0 {
            debug!(dropped, "dropped queued quads that left the view");
        }

        let mut effects = Effects {
            delta: demand.delta,
            ..Effects::default()
        };
        for quad in demand.requests {
            if let Some(admitted) = self.slots.request(quad) {
                self.rate.request(admitted);
            }
        }
        self.dispatch(now, &mut effects);
        effects
    }

    /// Feeds one loader result back in.
    pub fn deliver_layer(
        &mut self,
        tile: TileId,
        layer: Layer,
        outcome: FetchOutcome,
        now: Instant,
    ) -> Effects {
        let mut effects = Effects::default();
        if let Some(record) = self.layers.deliver(tile, layer, outcome) {
            if let Some(quad) = self.quads.deliver_tile(record) {
                self.finish_quad(quad, now, &mut effects);
            }
        }
        self.dispatch(now, &mut effects);
        effects
    }

    /// Releases whatever the rate limiter allows at `now`.
    pub fn poll(&mut self, now: Instant) -> Effects {
        let mut effects = Effects::default();
        self.dispatch(now, &mut effects);
        effects
    }

    /// When [`Pipeline::poll`] next has work, `None` while nothing waits on
    /// the rate limiter.
    pub fn next_dispatch_at(&self, now: Instant) -> Option<Instant> {
        self.rate.next_release_at(now)
    }

    /// Coming back online re-evaluates the last camera.
    pub fn set_online(&mut self, online: bool, now: Instant) -> Effects {
        if !self.scheduler.set_online(online) || !online {
            return Effects::default();
        }
        match self.camera {
            Some(camera) => self.update_camera(&camera, now),
            None => Effects::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            desired_quads: self.scheduler.desired().len(),
            cached_quads: self.scheduler.ram_cache().len(),
            gpu_quads: self.scheduler.gpu().len(),
            in_flight_quads: self.slots.in_flight(),
            queued_quads: self.slots.queued(),
            rate_limited_quads: self.rate.len(),
            loading_tiles: self.layers.loading(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn slots(&self) -> &SlotLimiter {
        &self.slots
    }

    pub fn culling(&self) -> &C {
        &self.culling
    }

    fn dispatch(&mut self, now: Instant, effects: &mut Effects) {
        loop {
            let released = self.rate.poll(now);
            if released.is_empty() {
                break;
            }
            for quad in released {
                self.assemble(quad, now, effects);
            }
        }
    }

    fn assemble(&mut self, quad: QuadId, now: Instant, effects: &mut Effects) {
        self.slots.mark(quad, Stage::Assembling);
        match self.quads.load(quad) {
            QuadLoad::Started(children) => {
                debug!(%quad, children = children.len(), "assembling quad");
                for child in children {
                    match self.layers.load(child) {
                        LayerLoad::Fetch(requests) => effects.fetches.extend(requests),
                        LayerLoad::Complete(tile) => {
                            if let Some(record) = self.quads.deliver_tile(tile) {
                                self.finish_quad(record, now, effects);
                            }
                        }
                        LayerLoad::AlreadyLoading => {
                            debug!(tile = %child, "tile already loading");
                        }
                    }
                }
            }
            QuadLoad::Complete(record) => self.finish_quad(record, now, effects),
            QuadLoad::AlreadyLoading => debug!(%quad, "quad already assembling"),
        }
    }

    fn finish_quad(&mut self, record: QuadRecord, now: Instant, effects: &mut Effects) {
        let (record, next) = self.slots.deliver(record);
        if let Some(next) = next {
            self.rate.request(next);
        }
        let id = record.id;
        debug!(quad = %id, drawable = record.is_drawable(), "quad assembled");
        effects.completed.push(id);
        match self.scheduler.receive_quad(record, now) {
            Ok(delta) => effects.delta.merge(delta),
            Err(CacheError::CapacityExceeded { .. }) => effects.refused.push(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;
    use terra_core::{FetchError, LayerSet};

    /// Camera longitude selects one of a fixed list of views.
    struct ScriptedViews(Vec<HashSet<TileId>>);

    impl Culling for ScriptedViews {
        fn needed_tiles(&self, camera: &CameraState) -> HashSet<TileId> {
            let index = camera.position.longitude as usize;
            self.0.get(index).cloned().unwrap_or_default()
        }
    }

    fn view(quads: &[QuadId]) -> HashSet<TileId> {
        quads.iter().flat_map(|quad| quad.children()).collect()
    }

    fn camera(view_index: usize) -> CameraState {
        CameraState::new(0.0, view_index as f64, 1_000.0)
    }

    fn quad(x: u32) -> QuadId {
        QuadId::new(5, x, 3)
    }

    fn config(slots: usize, layers: LayerSet) -> SchedulerConfig {
        SchedulerConfig {
            ram_quad_limit: 64,
            gpu_quad_limit: 64,
            max_concurrent_quads: slots,
            max_requests_per_second: 1_000.0,
            enabled_layers: layers,
            ..SchedulerConfig::default()
        }
    }

    fn height() -> LayerSet {
        LayerSet::empty().with(Layer::Height)
    }

    fn pipeline(config: SchedulerConfig, views: Vec<HashSet<TileId>>) -> Pipeline<ScriptedViews> {
        Pipeline::new(&config, ScriptedViews(views), TileCoverage::new(18)).unwrap()
    }

    fn quads_of(fetches: &[FetchRequest]) -> HashSet<QuadId> {
        fetches.iter().filter_map(|fetch| fetch.tile.parent()).collect()
    }

    fn deliver_all(
        pipeline: &mut Pipeline<ScriptedViews>,
        fetches: Vec<FetchRequest>,
        now: Instant,
    ) -> Effects {
        let mut combined = Effects::default();
        for fetch in fetches {
            let effects = pipeline.deliver_layer(fetch.tile, fetch.layer, Ok(vec![1]), now);
            combined.fetches.extend(effects.fetches);
            combined.delta.merge(effects.delta);
            combined.completed.extend(effects.completed);
            combined.refused.extend(effects.refused);
        }
        combined
    }

    #[test]
    fn zero_slots_is_a_configuration_error() {
        let result = Pipeline::new(
            &config(0, height()),
            ScriptedViews(Vec::new()),
            TileCoverage::default(),
        );
        assert!(matches!(result, Err(ConfigError::Zero { .. })));
    }

    #[test]
    fn third_quad_waits_for_a_free_slot() {
        let now = Instant::now();
        let mut pipeline = pipeline(config(2, height()), vec![view(&[quad(1), quad(2), quad(3)])]);

        let effects = pipeline.update_camera(&camera(0), now);
        assert_eq!(quads_of(&effects.fetches), HashSet::from([quad(1), quad(2)]));
        assert_eq!(pipeline.slots().stage(quad(3)), Some(Stage::Queued));

        let q1_fetches: Vec<FetchRequest> = effects
            .fetches
            .iter()
            .copied()
            .filter(|fetch| fetch.tile.parent() == Some(quad(1)))
            .collect();
        let after = deliver_all(&mut pipeline, q1_fetches, now);
        assert_eq!(after.completed, vec![quad(1)]);
        assert_eq!(quads_of(&after.fetches), HashSet::from([quad(3)]));
        assert_eq!(pipeline.slots().stage(quad(3)), Some(Stage::Assembling));
        assert_eq!(after.delta.added_ids().collect::<Vec<_>>(), vec![quad(1)]);
    }

    #[test]
    fn missing_layer_degrades_tile_without_blocking_quad() {
        let now = Instant::now();
        let q = quad(4);
        let mut pipeline = pipeline(config(4, LayerSet::all()), vec![view(&[q])]);

        let effects = pipeline.update_camera(&camera(0), now);
        assert_eq!(effects.fetches.len(), 12);

        let mut last = Effects::default();
        for fetch in effects.fetches {
            let outcome = match fetch.layer {
                Layer::Vector => Err(FetchError::NotFound),
                _ => Ok(vec![9]),
            };
            last = pipeline.deliver_layer(fetch.tile, fetch.layer, outcome, now);
        }
        assert_eq!(last.completed, vec![q]);
        let record = &last.delta.added[0];
        assert_eq!(record.tiles.len(), 4);
        for tile in &record.tiles {
            assert_eq!(tile.available_layers().len(), 2);
            assert_eq!(tile.resolved_layers().len(), 3);
        }
    }

    #[test]
    fn full_cache_of_visible_quads_refuses_the_newcomer() {
        let now = Instant::now();
        let a = quad(1);
        let b = quad(2);
        let mut config = config(2, height());
        config.ram_quad_limit = 1;
        let mut pipeline = pipeline(config, vec![view(&[a, b])]);

        let effects = pipeline.update_camera(&camera(0), now);
        let (a_fetches, b_fetches): (Vec<FetchRequest>, Vec<FetchRequest>) = effects
            .fetches
            .into_iter()
            .partition(|fetch| fetch.tile.parent() == Some(a));

        let first = deliver_all(&mut pipeline, a_fetches, now);
        assert_eq!(first.completed, vec![a]);
        let second = deliver_all(&mut pipeline, b_fetches, now);
        assert_eq!(second.refused, vec![b]);
        assert!(second.delta.is_empty());

        let cache = pipeline.scheduler().ram_cache();
        assert!(cache.contains(a));
        assert!(!cache.contains(b));

        // the pinned cache stops the refetch loop
        let again = pipeline.update_camera(&camera(0), now);
        assert!(again.fetches.is_empty());
    }

    #[test]
    fn returning_to_a_view_does_not_refetch_in_flight_tiles() {
        let now = Instant::now();
        let home = view(&[quad(1), quad(2), quad(3)]);
        let away = view(&[quad(20)]);
        let mut pipeline = pipeline(config(2, height()), vec![home, away]);

        let mut issued: HashMap<FetchRequest, usize> = HashMap::new();
        for index in [0, 1, 0, 1, 0] {
            for fetch in pipeline.update_camera(&camera(index), now).fetches {
                *issued.entry(fetch).or_default() += 1;
            }
        }
        assert!(issued.values().all(|count| *count == 1));
        assert_eq!(quads_of(&issued.keys().copied().collect::<Vec<_>>()).len(), 2);
        assert_eq!(pipeline.slots().stage(quad(3)), Some(Stage::Queued));
        assert!(!pipeline.slots().contains(&quad(20)));
    }

    #[test]
    fn repeated_updates_are_idempotent() {
        let now = Instant::now();
        let mut pipeline = pipeline(config(4, height()), vec![view(&[quad(1)])]);
        let first = pipeline.update_camera(&camera(0), now);
        assert_eq!(first.fetches.len(), 4);
        let loading = pipeline.stats().loading_tiles;

        let second = pipeline.update_camera(&camera(0), now);
        assert!(second.is_empty());
        assert_eq!(pipeline.stats().loading_tiles, loading);
        assert_eq!(pipeline.stats().in_flight_quads, 1);
    }

    #[test]
    fn rate_limit_spreads_dispatch_over_time() {
        let start = Instant::now();
        let mut config = config(16, height());
        config.max_requests_per_second = 2.0;
        let quads: Vec<QuadId> = (0..4).map(quad).collect();
        let mut pipeline = pipeline(config, vec![view(&quads)]);

        let effects = pipeline.update_camera(&camera(0), start);
        assert_eq!(quads_of(&effects.fetches).len(), 2);
        assert_eq!(pipeline.stats().rate_limited_quads, 2);

        let wake = pipeline.next_dispatch_at(start).unwrap();
        assert_eq!(wake, start + Duration::from_millis(500));
        assert_eq!(quads_of(&pipeline.poll(wake).fetches), HashSet::from([quad(2)]));
        assert_eq!(quads_of(&pipeline.poll(start + Duration::from_secs(1)).fetches), HashSet::from([quad(3)]));
        assert_eq!(pipeline.next_dispatch_at(start + Duration::from_secs(1)), None);
    }

    #[test]
    fn no_enabled_layers_completes_quads_without_fetching() {
        let now = Instant::now();
        let mut pipeline = pipeline(config(1, LayerSet::empty()), vec![view(&[quad(1), quad(2)])]);
        let effects = pipeline.update_camera(&camera(0), now);
        assert!(effects.fetches.is_empty());
        assert_eq!(effects.completed, vec![quad(1), quad(2)]);
        assert_eq!(effects.delta.added.len(), 2);
        assert_eq!(pipeline.stats().in_flight_quads, 0);
    }

    #[test]
    fn offline_pipeline_resumes_with_last_camera() {
        let now = Instant::now();
        let mut pipeline = pipeline(config(4, height()), vec![view(&[quad(1)])]);
        assert!(pipeline.set_online(false, now).is_empty());
        assert!(pipeline.update_camera(&camera(0), now).fetches.is_empty());

        let resumed = pipeline.set_online(true, now);
        assert_eq!(quads_of(&resumed.fetches), HashSet::from([quad(1)]));
    }

    #[test]
    fn invariants_hold_under_interleaved_traffic() {
        let start = Instant::now();
        let views: Vec<HashSet<TileId>> = (0..4u32)
            .map(|offset| view(&(offset * 3..offset * 3 + 6).map(quad).collect::<Vec<_>>()))
            .collect();
        let mut config = config(3, LayerSet::empty().with(Layer::Height).with(Layer::Ortho));
        config.ram_quad_limit = 8;
        config.gpu_quad_limit = 5;
        config.max_requests_per_second = 20.0;
        let mut pipeline = pipeline(config, views);

        let mut seed: u64 = 0x5eed;
        let mut next = move |bound: usize| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 33) as usize) % bound
        };

        let mut outstanding: Vec<FetchRequest> = Vec::new();
        let mut issued: HashSet<FetchRequest> = HashSet::new();
        let mut resident: HashSet<QuadId> = HashSet::new();
        let mut now = start;

        for _ in 0..400 {
            now += Duration::from_millis(20);
            let effects = match next(4) {
                0 => pipeline.update_camera(&camera(next(4)), now),
                1 | 2 if !outstanding.is_empty() => {
                    let fetch = outstanding.swap_remove(next(outstanding.len()));
                    let outcome = if next(5) == 0 {
                        Err(FetchError::NotFound)
                    } else {
                        Ok(vec![1])
                    };
                    pipeline.deliver_layer(fetch.tile, fetch.layer, outcome, now)
                }
                _ => pipeline.poll(now),
            };

            for fetch in &effects.fetches {
                assert!(issued.insert(*fetch) || !outstanding.contains(fetch));
            }
            outstanding.extend(effects.fetches);
            for quad in &effects.delta.removed {
                assert!(resident.remove(quad), "removed a quad that was not resident");
            }
            for record in &effects.delta.added {
                assert!(resident.insert(record.id), "added a resident quad twice");
            }

            let stats = pipeline.stats();
            assert!(stats.in_flight_quads <= 3);
            assert!(stats.cached_quads <= 8);
            assert!(stats.gpu_quads <= 5);
            let scheduler = pipeline.scheduler();
            assert!(resident.iter().all(|quad| scheduler.ram_cache().contains(*quad)));
            assert_eq!(resident.len(), scheduler.gpu().len());
        }
    }
}
