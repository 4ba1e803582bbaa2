mod flight;
mod renderer;
mod tiles;

use std::sync::Arc;
use std::time::Duration;
use terra_config::{LoaderConfig, SchedulerConfig, ServiceConfig};
use terra_geo::{ScreenSpaceErrorCulling, TileCoverage};
use terra_observability::{init, log_startup, ObservabilityConfig};
use terra_scheduler::{RetryingLoader, StoreBackedLoader};
use terra_storage::DiskTileStore;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::flight::FlightPath;
use crate::renderer::GpuMirror;
use crate::tiles::HttpTileLoader;

const FRAME_INTERVAL: Duration = Duration::from_millis(100);
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env("terra-streamer");
    let obs_config = ObservabilityConfig {
        service_name: config.service_name.clone(),
        environment: config.environment.to_string(),
        log_level: config.log_level.clone(),
        metrics_addr: config.metrics_addr.clone(),
    };
    let handle = init(&obs_config);
    log_startup(&handle, &obs_config.environment);

    let scheduler_config = SchedulerConfig::from_env()?;
    let loader_config = LoaderConfig::from_env();
    loader_config.validate(scheduler_config.enabled_layers)?;

    let store = DiskTileStore::open(config.tile_cache_dir()).await?;
    let upstream = RetryingLoader::from_config(
        HttpTileLoader::new(&loader_config, scheduler_config.enabled_layers)?,
        &loader_config,
    );
    let loader = StoreBackedLoader::new(upstream, Arc::new(store))
        .with_max_age(loader_config.disk_cache_max_age());
    // Four child tiles per cached quad.
    let warm_limit = scheduler_config
        .ram_quad_limit
        .saturating_mul(4 * scheduler_config.enabled_layers.len());
    match loader.warm_start(warm_limit).await {
        Ok(layers) => tracing::info!(
            layers,
            cache_dir = %config.tile_cache_dir().display(),
            "tile cache warm start complete"
        ),
        Err(err) => tracing::warn!(error = %err, "tile cache warm start failed, starting cold"),
    }

    let coverage = TileCoverage::new(scheduler_config.max_zoom);
    let (scheduler, mut deltas) = terra_scheduler::spawn(
        &scheduler_config,
        Arc::new(loader),
        ScreenSpaceErrorCulling::new(coverage),
        coverage,
        loader_config.fetch_deadline(),
    )?;

    let flight = FlightPath::alpine_tour();
    tracing::info!(
        waypoints = flight.waypoints().len(),
        start = flight.waypoints().first().map(|waypoint| waypoint.name).unwrap_or("-"),
        loop_secs = flight.loop_duration().as_secs(),
        "replaying camera flight"
    );

    let mut mirror = GpuMirror::default();
    let started = Instant::now();
    let mut frames = interval(FRAME_INTERVAL);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report = interval(REPORT_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = frames.tick() => scheduler.update_camera(flight.camera_at(started.elapsed())),
            delta = deltas.recv() => match delta {
                Some(delta) => mirror.apply(delta),
                None => {
                    tracing::error!("tile scheduler stopped unexpectedly");
                    break;
                }
            },
            _ = report.tick() => tracing::info!(
                resident_quads = mirror.len(),
                drawable_tiles = mirror.drawable_tiles(),
                resident_bytes = mirror.resident_bytes(),
                uploads = mirror.uploads(),
                "renderer state"
            ),
            result = &mut shutdown => {
                if let Err(err) = result {
                    tracing::error!("failed to install ctrl-c handler: {}", err);
                }
                break;
            }
        }
    }

    scheduler.shutdown().await;
    tracing::info!("terra-streamer stopped");
    Ok(())
}
