use metrics::{describe_counter, describe_gauge, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

pub const FETCHES_TOTAL: &str = "terra_fetches_total";
pub const QUADS_COMPLETED_TOTAL: &str = "terra_quads_completed_total";
pub const QUADS_REFUSED_TOTAL: &str = "terra_quads_refused_total";
pub const RAM_CACHE_QUADS: &str = "terra_ram_cache_quads";
pub const GPU_QUADS: &str = "terra_gpu_quads";
pub const QUADS_IN_FLIGHT: &str = "terra_quads_in_flight";
pub const QUADS_QUEUED: &str = "terra_quads_queued";

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub environment: String,
    pub log_level: String,
    pub metrics_addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObservabilityHandle {
    pub service_name: String,
    pub metrics_enabled: bool,
}

pub fn init(config: &ObservabilityConfig) -> ObservabilityHandle {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);

    let metrics_enabled = init_metrics(config);
    if metrics_enabled {
        describe_metrics();
    }

    ObservabilityHandle {
        service_name: config.service_name.clone(),
        metrics_enabled,
    }
}

pub fn log_startup(handle: &ObservabilityHandle, environment: &str) {
    tracing::info!(
        service = %handle.service_name,
        environment = %environment,
        metrics_enabled = handle.metrics_enabled,
        "terra service starting"
    );
}

fn describe_metrics() {
    describe_counter!(FETCHES_TOTAL, "Layer fetches resolved, by layer and outcome");
    describe_counter!(QUADS_COMPLETED_TOTAL, "Quads fully assembled");
    describe_counter!(
        QUADS_REFUSED_TOTAL,
        "Completed quads refused by a RAM cache pinned by the current view"
    );
    describe_gauge!(RAM_CACHE_QUADS, Unit::Count, "Quads held in the RAM cache");
    describe_gauge!(GPU_QUADS, Unit::Count, "Quads resident on the GPU");
    describe_gauge!(QUADS_IN_FLIGHT, Unit::Count, "Quads holding an admission slot");
    describe_gauge!(QUADS_QUEUED, Unit::Count, "Quads waiting for an admission slot");
}

fn init_metrics(config: &ObservabilityConfig) -> bool {
    let Some(addr) = config.metrics_addr.as_ref() else {
        return false;
    };
    let addr: SocketAddr = match addr.parse() {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(
                service = %config.service_name,
                error = %err,
                "Invalid TERRA_METRICS_ADDR value"
            );
            return false;
        }
    };

    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", config.service_name.clone())
        .add_global_label("environment", config.environment.clone());

    match builder.install() {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                service = %config.service_name,
                error = %err,
                "Failed to initialize Prometheus exporter"
            );
            false
        }
    }
}
