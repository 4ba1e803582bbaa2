use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use terra_config::LoaderConfig;
use terra_core::{now_epoch_millis, FetchOutcome, Layer, TileId};
use terra_storage::{StorageError, StoredTile, TileStore};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Source of raw layer bytes. Implementations may be called concurrently for
/// different `(tile, layer)` pairs and must resolve every call exactly once.
#[async_trait]
pub trait TileLoader: Send + Sync {
    async fn fetch(&self, tile: TileId, layer: Layer) -> FetchOutcome;
}

#[async_trait]
impl<L: TileLoader + ?Sized> TileLoader for Arc<L> {
    async fn fetch(&self, tile: TileId, layer: Layer) -> FetchOutcome {
        (**self).fetch(tile, layer).await
    }
}

/// Retries transient failures with exponential backoff. Terminal outcomes
/// (`NotFound`, `Malformed`) are returned on the first attempt.
pub struct RetryingLoader<L> {
    inner: L,
    max_attempts: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
}

impl<L: TileLoader> RetryingLoader<L> {
    pub fn new(inner: L, max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        let initial_delay_ms = (initial_delay.as_millis() as u64).max(1);
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            initial_delay_ms,
            max_delay_ms: (max_delay.as_millis() as u64).max(initial_delay_ms),
        }
    }

    pub fn from_config(inner: L, config: &LoaderConfig) -> Self {
        Self::new(
            inner,
            config.fetch_max_attempts,
            Duration::from_millis(config.fetch_retry_initial_ms),
            Duration::from_millis(config.fetch_retry_max_ms),
        )
    }
}

#[async_trait]
impl<L: TileLoader> TileLoader for RetryingLoader<L> {
    async fn fetch(&self, tile: TileId, layer: Layer) -> FetchOutcome {
        let mut attempt: u32 = 0;
        let mut delay_ms = self.initial_delay_ms;

        loop {
            match self.inner.fetch(tile, layer).await {
                Err(err) if err.is_transient() => {
                    attempt = attempt.saturating_add(1);
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    debug!(
                        %tile,
                        %layer,
                        attempt,
                        delay_ms,
                        error = %err,
                        "tile fetch failed, retrying"
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = delay_ms.saturating_mul(2).min(self.max_delay_ms);
                }
                outcome => return outcome,
            }
        }
    }
}

type LocalKey = (TileId, Layer);

/// Serves layers from a local store before going upstream and writes every
/// upstream success through to it.
///
/// Entries read by [`StoreBackedLoader::warm_start`] are held in memory until
/// first served; later reads go to the store itself. Stored entries older
/// than the max age count as misses and are refetched.
pub struct StoreBackedLoader<L> {
    upstream: L,
    store: Arc<dyn TileStore>,
    max_age: Option<Duration>,
    warm: Mutex<HashMap<LocalKey, StoredTile>>,
}

impl<L: TileLoader> StoreBackedLoader<L> {
    pub fn new(upstream: L, store: Arc<dyn TileStore>) -> Self {
        Self {
            upstream,
            store,
            max_age: None,
            warm: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Pre-populates the in-memory set with at most `limit` of the most
    /// recently stored layers. Returns how many were kept.
    pub async fn warm_start(&self, limit: usize) -> Result<usize, StorageError> {
        let mut stored = self.store.load_all(self.max_age).await?;
        stored.sort_unstable_by(|a, b| b.stored_at_ms.cmp(&a.stored_at_ms));
        stored.truncate(limit);

        let mut warm = self.warm.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for entry in stored {
            warm.insert((entry.tile, entry.layer), entry);
        }
        Ok(warm.len())
    }

    pub fn warm_len(&self) -> usize {
        self.warm
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn take_warm(&self, key: LocalKey) -> Option<StoredTile> {
        self.warm
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&key)
    }

    fn is_fresh(&self, stored: &StoredTile) -> bool {
        self.max_age.is_none_or(|max_age| {
            now_epoch_millis().saturating_sub(stored.stored_at_ms) <= max_age.as_millis() as u64
        })
    }
}

#[async_trait]
impl<L: TileLoader> TileLoader for StoreBackedLoader<L> {
    async fn fetch(&self, tile: TileId, layer: Layer) -> FetchOutcome {
        if let Some(stored) = self.take_warm((tile, layer)) {
            if self.is_fresh(&stored) {
                return Ok(stored.bytes);
            }
        }
        match self.store.get(tile, layer).await {
            Ok(Some(stored)) if self.is_fresh(&stored) => return Ok(stored.bytes),
            Ok(Some(_)) => debug!(%tile, %layer, "stored tile expired, refetching"),
            Ok(None) => {}
            Err(err) => warn!(%tile, %layer, error = %err, "tile store read failed"),
        }

        let outcome = self.upstream.fetch(tile, layer).await;
        if let Ok(bytes) = &outcome {
            if let Err(err) = self.store.put(tile, layer, bytes).await {
                warn!(%tile, %layer, error = %err, "tile store write failed");
            }
        }
        outcome
    }
}
