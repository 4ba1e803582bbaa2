use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use terra_core::{EpochMillis, Layer, TileId};

mod disk;

pub use disk::DiskTileStore;

#[derive(Debug, Clone)]
pub struct StorageError {
    pub message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::new(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTile {
    pub tile: TileId,
    pub layer: Layer,
    pub bytes: Vec<u8>,
    pub stored_at_ms: EpochMillis,
}

/// Persisted raw tile bytes keyed by `(tile, layer)`. Losing it costs
/// refetches, never correctness.
#[async_trait]
pub trait TileStore: Send + Sync {
    async fn get(&self, tile: TileId, layer: Layer) -> Result<Option<StoredTile>, StorageError>;
    async fn put(&self, tile: TileId, layer: Layer, bytes: &[u8]) -> Result<(), StorageError>;
    /// Every entry younger than `max_age` (all entries when `None`).
    async fn load_all(&self, max_age: Option<Duration>) -> Result<Vec<StoredTile>, StorageError>;
}
