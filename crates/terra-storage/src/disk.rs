use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use terra_core::time::to_epoch_millis;
use terra_core::{now_epoch_millis, Layer, TileId};
use tokio::fs;
use tracing::{debug, warn};

use crate::{StorageError, StoredTile, TileStore};

const TILE_EXTENSION: &str = "tile";

/// Lays tiles out as `<root>/<layer>/<z>/<x>/<y>.tile`.
#[derive(Debug, Clone)]
pub struct DiskTileStore {
    root: PathBuf,
}

impl DiskTileStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|err| {
            StorageError::new(format!("cannot create {}: {}", root.display(), err))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, tile: TileId, layer: Layer) -> PathBuf {
        self.root
            .join(layer.as_str())
            .join(tile.zoom.to_string())
            .join(tile.x.to_string())
            .join(format!("{}.{}", tile.y, TILE_EXTENSION))
    }

    async fn load_layer(
        &self,
        layer: Layer,
        cutoff_ms: Option<u64>,
        out: &mut Vec<StoredTile>,
    ) -> Result<(), StorageError> {
        let layer_dir = self.root.join(layer.as_str());
        for (zoom, zoom_dir) in numbered_entries::<u8>(&layer_dir).await? {
            for (x, x_dir) in numbered_entries::<u32>(&zoom_dir).await? {
                let mut files = fs::read_dir(&x_dir).await?;
                while let Some(entry) = files.next_entry().await? {
                    let path = entry.path();
                    if path.extension().and_then(|ext| ext.to_str()) != Some(TILE_EXTENSION) {
                        continue;
                    }
                    let Some(y) = path
                        .file_stem()
                        .and_then(|stem| stem.to_str())
                        .and_then(|stem| stem.parse::<u32>().ok())
                    else {
                        warn!(path = %path.display(), "skipping unparsable tile file");
                        continue;
                    };
                    let tile = TileId::new(zoom, x, y);
                    if !tile.is_valid() {
                        warn!(path = %path.display(), "skipping out of range tile file");
                        continue;
                    }
                    let stored_at_ms = entry
                        .metadata()
                        .await?
                        .modified()
                        .map(to_epoch_millis)
                        .unwrap_or_default();
                    if cutoff_ms.is_some_and(|cutoff| stored_at_ms < cutoff) {
                        continue;
                    }
                    let bytes = fs::read(&path).await?;
                    out.push(StoredTile {
                        tile,
                        layer,
                        bytes,
                        stored_at_ms,
                    });
                }
            }
        }
        Ok(())
    }
}

async fn numbered_entries<T: FromStr>(dir: &Path) -> Result<Vec<(T, PathBuf)>, StorageError> {
    let mut entries = Vec::new();
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = read_dir.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if let Some(value) = name.to_str().and_then(|name| name.parse::<T>().ok()) {
            entries.push((value, entry.path()));
        }
    }
    Ok(entries)
}

#[async_trait]
impl TileStore for DiskTileStore {
    async fn get(&self, tile: TileId, layer: Layer) -> Result<Option<StoredTile>, StorageError> {
        let path = self.path_for(tile, layer);
        let stored_at_ms = match fs::metadata(&path).await {
            Ok(metadata) => metadata.modified().map(to_epoch_millis).unwrap_or_default(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(StoredTile {
                tile,
                layer,
                bytes,
                stored_at_ms,
            })),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, tile: TileId, layer: Layer, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(tile, layer);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // `.partial` files are never picked up by `load_all`.
        let partial = path.with_extension("partial");
        fs::write(&partial, bytes).await?;
        fs::rename(&partial, &path).await?;
        Ok(())
    }

    async fn load_all(&self, max_age: Option<Duration>) -> Result<Vec<StoredTile>, StorageError> {
        let cutoff_ms =
            max_age.map(|age| now_epoch_millis().saturating_sub(age.as_millis() as u64));
        let mut tiles = Vec::new();
        for layer in Layer::ALL {
            self.load_layer(layer, cutoff_ms, &mut tiles).await?;
        }
        debug!(root = %self.root.display(), count = tiles.len(), "read disk tile cache");
        Ok(tiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("terra-storage-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn put_then_get_and_load_all() {
        let dir = scratch_dir("roundtrip");
        let store = DiskTileStore::open(&dir).await.unwrap();
        let tile = TileId::new(7, 68, 44);

        assert_eq!(store.get(tile, Layer::Ortho).await.unwrap(), None);
        store.put(tile, Layer::Ortho, b"jpeg").await.unwrap();
        store.put(tile, Layer::Height, b"png").await.unwrap();
        let stored = store.get(tile, Layer::Ortho).await.unwrap().expect("stored tile");
        assert_eq!(stored.bytes, b"jpeg".to_vec());
        assert!(stored.stored_at_ms > 0);

        let mut all = store.load_all(None).await.unwrap();
        all.sort_by_key(|stored| stored.layer);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].layer, Layer::Height);
        assert_eq!(all[0].tile, tile);
        assert_eq!(all[1].bytes, b"jpeg".to_vec());

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn load_all_ignores_foreign_files() {
        let dir = scratch_dir("foreign");
        let store = DiskTileStore::open(&dir).await.unwrap();
        store.put(TileId::new(2, 1, 3), Layer::Vector, b"pbf").await.unwrap();
        fs::write(dir.join("vector").join("2").join("1").join("notes.txt"), b"x")
            .await
            .unwrap();
        fs::create_dir_all(dir.join("vector").join("zoom")).await.unwrap();

        let all = store.load_all(Some(Duration::from_secs(3600))).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].tile, TileId::new(2, 1, 3));

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn stored_at_follows_file_modification_time() {
        let dir = scratch_dir("mtime");
        let store = DiskTileStore::open(&dir).await.unwrap();
        let tile = TileId::new(5, 17, 11);
        store.put(tile, Layer::Height, b"old").await.unwrap();

        let sixty_days_ago = SystemTime::now() - Duration::from_secs(60 * 24 * 60 * 60);
        std::fs::File::options()
            .write(true)
            .open(store.path_for(tile, Layer::Height))
            .unwrap()
            .set_modified(sixty_days_ago)
            .unwrap();

        let stored = store.get(tile, Layer::Height).await.unwrap().expect("stored tile");
        assert!(stored.stored_at_ms.abs_diff(to_epoch_millis(sixty_days_ago)) < 2_000);
        let thirty_days = Duration::from_secs(30 * 24 * 60 * 60);
        assert!(store.load_all(Some(thirty_days)).await.unwrap().is_empty());

        let _ = fs::remove_dir_all(&dir).await;
    }
}
