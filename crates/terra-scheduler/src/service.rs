//! Async host for a [`Pipeline`].
//!
//! One task owns the pipeline and is the only place its state changes.
//! Loader fetches run as separate tasks and report back over a channel, so
//! they never touch pipeline state themselves.

use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::{Duration, Instant};
use terra_config::{ConfigError, SchedulerConfig};
use terra_core::{FetchError, FetchOutcome};
use terra_geo::{CameraState, Culling, TileCoverage};
use terra_observability::{
    FETCHES_TOTAL, GPU_QUADS, QUADS_COMPLETED_TOTAL, QUADS_IN_FLIGHT, QUADS_QUEUED,
    QUADS_REFUSED_TOTAL, RAM_CACHE_QUADS,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::gpu_cache::GpuDelta;
use crate::layer_assembler::FetchRequest;
use crate::loader::TileLoader;
use crate::pipeline::{Effects, Pipeline};

enum Control {
    SetOnline(bool),
    Shutdown,
}

struct LayerResult {
    request: FetchRequest,
    outcome: FetchOutcome,
}

/// Handle to a running scheduler task.
pub struct SchedulerHandle {
    camera_tx: watch::Sender<Option<CameraState>>,
    control_tx: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Replaces the pending camera. Updates arriving faster than the task
    /// drains them collapse into the latest one.
    pub fn update_camera(&self, camera: CameraState) {
        self.camera_tx.send_replace(Some(camera));
    }

    pub fn set_online(&self, online: bool) {
        let _ = self.control_tx.send(Control::SetOnline(online));
    }

    /// Stops the task. Fetches still running are abandoned.
    pub async fn shutdown(self) {
        let _ = self.control_tx.send(Control::Shutdown);
        let _ = self.task.await;
    }
}

/// Starts the scheduler task. GPU deltas are delivered, in order, on the
/// returned receiver.
pub fn spawn<C>(
    config: &SchedulerConfig,
    loader: Arc<dyn TileLoader>,
    culling: C,
    coverage: TileCoverage,
    fetch_timeout: Duration,
) -> Result<(SchedulerHandle, mpsc::UnboundedReceiver<GpuDelta>), ConfigError>
where
    C: Culling + 'static,
{
    let pipeline = Pipeline::new(config, culling, coverage)?;
    let (camera_tx, camera_rx) = watch::channel(None);
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (delta_tx, delta_rx) = mpsc::unbounded_channel();

    let actor = Actor {
        pipeline,
        loader,
        fetch_timeout,
        delta_tx,
    };
    let task = tokio::spawn(actor.run(camera_rx, control_rx));
    info!(
        max_concurrent_quads = config.max_concurrent_quads,
        max_requests_per_second = config.max_requests_per_second,
        enabled_layers = %config.enabled_layers,
        "tile scheduler started"
    );

    Ok((
        SchedulerHandle {
            camera_tx,
            control_tx,
            task,
        },
        delta_rx,
    ))
}

struct Actor<C> {
    pipeline: Pipeline<C>,
    loader: Arc<dyn TileLoader>,
    fetch_timeout: Duration,
    delta_tx: mpsc::UnboundedSender<GpuDelta>,
}

impl<C: Culling + 'static> Actor<C> {
    async fn run(
        mut self,
        mut camera_rx: watch::Receiver<Option<CameraState>>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
    ) {
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<LayerResult>();

        loop {
            let wake_at = self.pipeline.next_dispatch_at(now());
            let rate_wait = async move {
                match wake_at {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let effects = tokio::select! {
                biased;

                control = control_rx.recv() => match control {
                    Some(Control::SetOnline(online)) => self.pipeline.set_online(online, now()),
                    Some(Control::Shutdown) | None => break,
                },
                changed = camera_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let camera = *camera_rx.borrow_and_update();
                    match camera {
                        Some(camera) => self.pipeline.update_camera(&camera, now()),
                        None => continue,
                    }
                }
                Some(result) = result_rx.recv() => {
                    record_fetch(&result);
                    self.pipeline.deliver_layer(
                        result.request.tile,
                        result.request.layer,
                        result.outcome,
                        now(),
                    )
                }
                _ = rate_wait => self.pipeline.poll(now()),
            };

            if !self.apply(effects, &result_tx) {
                break;
            }
        }
        info!("tile scheduler stopped");
    }

    /// Returns false once nobody listens for deltas anymore.
    fn apply(&self, effects: Effects, result_tx: &mpsc::UnboundedSender<LayerResult>) -> bool {
        for request in effects.fetches {
            self.spawn_fetch(request, result_tx.clone());
        }
        counter!(QUADS_COMPLETED_TOTAL).increment(effects.completed.len() as u64);
        counter!(QUADS_REFUSED_TOTAL).increment(effects.refused.len() as u64);

        let stats = self.pipeline.stats();
        gauge!(RAM_CACHE_QUADS).set(stats.cached_quads as f64);
        gauge!(GPU_QUADS).set(stats.gpu_quads as f64);
        gauge!(QUADS_IN_FLIGHT).set(stats.in_flight_quads as f64);
        gauge!(QUADS_QUEUED).set(stats.queued_quads as f64);

        if effects.delta.is_empty() {
            return true;
        }
        debug!(
            added = effects.delta.added.len(),
            removed = effects.delta.removed.len(),
            resident = stats.gpu_quads,
            "emitting GPU delta"
        );
        self.delta_tx.send(effects.delta).is_ok()
    }

    fn spawn_fetch(&self, request: FetchRequest, result_tx: mpsc::UnboundedSender<LayerResult>) {
        let loader = Arc::clone(&self.loader);
        let timeout = self.fetch_timeout;
        tokio::spawn(async move {
            let outcome =
                match tokio::time::timeout(timeout, loader.fetch(request.tile, request.layer)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FetchError::Transient(format!(
                        "timed out after {} ms",
                        timeout.as_millis()
                    ))),
                };
            let _ = result_tx.send(LayerResult { request, outcome });
        });
    }
}

// tokio clock, so paused time in tests applies here too.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn record_fetch(result: &LayerResult) {
    let outcome = match &result.outcome {
        Ok(_) => "ok",
        Err(FetchError::NotFound) => "not_found",
        Err(FetchError::Transient(_)) => "transient",
        Err(FetchError::Malformed(_)) => "malformed",
    };
    counter!(
        FETCHES_TOTAL,
        "layer" => result.request.layer.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}
