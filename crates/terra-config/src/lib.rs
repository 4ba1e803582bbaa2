use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fmt};
use terra_core::{Layer, LayerSet, MAX_SUPPORTED_ZOOM, TerraError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("max_requests_per_second must be a positive finite number, got {0}")]
    InvalidRate(f64),
    #[error("max_zoom {0} exceeds the deepest supported level")]
    ZoomTooDeep(u8),
    #[error("invalid layer list: {0}")]
    Layers(#[from] TerraError),
    #[error("url template for {layer} must contain {{z}}, {{x}} and {{y}}: `{template}`")]
    UrlTemplate { layer: Layer, template: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Local,
    Dev,
    Test,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_env(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "local" => Self::Local,
            "dev" | "development" => Self::Dev,
            "test" | "testing" => Self::Test,
            "staging" => Self::Staging,
            "prod" | "production" => Self::Prod,
            _ => Self::Local,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Prod => "prod",
        };
        write!(f, "{}", value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub environment: Environment,
    pub metrics_addr: Option<String>,
    pub log_level: String,
    pub data_dir: String,
}

impl ServiceConfig {
    pub fn from_env(default_service_name: &str) -> Self {
        let service_name = env_var("TERRA_SERVICE_NAME", default_service_name.to_string());
        let environment = Environment::from_env(&env_var("TERRA_ENV", "local".to_string()));
        let metrics_addr = env::var("TERRA_METRICS_ADDR").ok();
        let log_level = env_var("TERRA_LOG_LEVEL", "info".to_string());
        let data_dir = env_var("TERRA_DATA_DIR", "./data".to_string());

        Self {
            service_name,
            environment,
            metrics_addr,
            log_level,
            data_dir,
        }
    }

    pub fn tile_cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("tiles")
    }
}

/// Knobs of the tile request pipeline. Set once before the pipeline starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub ram_quad_limit: usize,
    pub gpu_quad_limit: usize,
    pub max_concurrent_quads: usize,
    pub max_requests_per_second: f64,
    pub enabled_layers: LayerSet,
    pub max_zoom: u8,
    pub failed_quad_retry_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ram_quad_limit: 12_000,
            gpu_quad_limit: 512,
            max_concurrent_quads: 16,
            max_requests_per_second: 100.0,
            enabled_layers: LayerSet::empty().with(Layer::Height).with(Layer::Ortho),
            max_zoom: 18,
            failed_quad_retry_secs: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let enabled_layers = match env::var("TERRA_ENABLED_LAYERS") {
            Ok(value) => LayerSet::parse(&value)?,
            Err(_) => defaults.enabled_layers,
        };
        let config = Self {
            ram_quad_limit: env_var_usize("TERRA_RAM_QUAD_LIMIT", defaults.ram_quad_limit),
            gpu_quad_limit: env_var_usize("TERRA_GPU_QUAD_LIMIT", defaults.gpu_quad_limit),
            max_concurrent_quads: env_var_usize(
                "TERRA_MAX_CONCURRENT_QUADS",
                defaults.max_concurrent_quads,
            ),
            max_requests_per_second: env_var_f64(
                "TERRA_MAX_REQUESTS_PER_SECOND",
                defaults.max_requests_per_second,
            ),
            enabled_layers,
            max_zoom: env_var_u8("TERRA_MAX_ZOOM", defaults.max_zoom),
            failed_quad_retry_secs: env_var_u64(
                "TERRA_FAILED_QUAD_RETRY_SECS",
                defaults.failed_quad_retry_secs,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ram_quad_limit == 0 {
            return Err(ConfigError::Zero {
                name: "ram_quad_limit",
            });
        }
        if self.gpu_quad_limit == 0 {
            return Err(ConfigError::Zero {
                name: "gpu_quad_limit",
            });
        }
        if self.max_concurrent_quads == 0 {
            return Err(ConfigError::Zero {
                name: "max_concurrent_quads",
            });
        }
        if !self.max_requests_per_second.is_finite() || self.max_requests_per_second <= 0.0 {
            return Err(ConfigError::InvalidRate(self.max_requests_per_second));
        }
        if self.max_zoom > MAX_SUPPORTED_ZOOM {
            return Err(ConfigError::ZoomTooDeep(self.max_zoom));
        }
        Ok(())
    }

    pub fn failed_quad_retry(&self) -> Duration {
        Duration::from_secs(self.failed_quad_retry_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub height_url: String,
    pub ortho_url: String,
    pub vector_url: String,
    pub fetch_timeout_ms: u64,
    pub fetch_max_attempts: u32,
    pub fetch_retry_initial_ms: u64,
    pub fetch_retry_max_ms: u64,
    pub disk_cache_max_age_days: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            height_url: "https://s3.amazonaws.com/elevation-tiles-prod/terrarium/{z}/{x}/{y}.png"
                .to_string(),
            ortho_url: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            vector_url: String::new(),
            fetch_timeout_ms: 8_000,
            fetch_max_attempts: 3,
            fetch_retry_initial_ms: 250,
            fetch_retry_max_ms: 4_000,
            disk_cache_max_age_days: 30,
        }
    }
}

impl LoaderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            height_url: env_var("TERRA_HEIGHT_URL", defaults.height_url),
            ortho_url: env_var("TERRA_ORTHO_URL", defaults.ortho_url),
            vector_url: env_var("TERRA_VECTOR_URL", defaults.vector_url),
            fetch_timeout_ms: env_var_u64("TERRA_FETCH_TIMEOUT_MS", defaults.fetch_timeout_ms),
            fetch_max_attempts: env_var_u32(
                "TERRA_FETCH_MAX_ATTEMPTS",
                defaults.fetch_max_attempts,
            ),
            fetch_retry_initial_ms: env_var_u64(
                "TERRA_FETCH_RETRY_INITIAL_MS",
                defaults.fetch_retry_initial_ms,
            ),
            fetch_retry_max_ms: env_var_u64(
                "TERRA_FETCH_RETRY_MAX_MS",
                defaults.fetch_retry_max_ms,
            ),
            disk_cache_max_age_days: env_var_u64(
                "TERRA_DISK_CACHE_MAX_AGE_DAYS",
                defaults.disk_cache_max_age_days,
            ),
        }
    }

    pub fn url_template(&self, layer: Layer) -> &str {
        match layer {
            Layer::Height => &self.height_url,
            Layer::Ortho => &self.ortho_url,
            Layer::Vector => &self.vector_url,
        }
    }

    /// Every enabled layer needs a usable template.
    pub fn validate(&self, enabled_layers: LayerSet) -> Result<(), ConfigError> {
        for layer in enabled_layers.iter() {
            let template = self.url_template(layer);
            if !["{z}", "{x}", "{y}"]
                .iter()
                .all(|placeholder| template.contains(placeholder))
            {
                return Err(ConfigError::UrlTemplate {
                    layer,
                    template: template.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms.max(1))
    }

    /// Upper bound for one loader call including every retry and backoff.
    pub fn fetch_deadline(&self) -> Duration {
        let attempts = u64::from(self.fetch_max_attempts.max(1));
        let per_attempt = self.fetch_timeout_ms.max(1);
        let backoff = self.fetch_retry_max_ms * (attempts - 1);
        Duration::from_millis(per_attempt * attempts + backoff)
    }

    pub fn disk_cache_max_age(&self) -> Option<Duration> {
        (self.disk_cache_max_age_days > 0)
            .then(|| Duration::from_secs(self.disk_cache_max_age_days * 24 * 60 * 60))
    }
}

fn env_var(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_var_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_var_u8(key: &str, default: u8) -> u8 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u8>().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .unwrap_or(default)
}
