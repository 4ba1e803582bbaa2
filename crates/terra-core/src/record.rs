use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{FetchError, FetchOutcome};
use crate::layer::{Layer, LayerSet};
use terra_geo::{tile_bounds, BoundingBox, QuadId, TileId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MissingReason {
    NotFound,
    /// Transient failures that outlived the loader's retries.
    NetworkError,
    Malformed,
}

/// Terminal state of one layer of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerStatus {
    Available(Arc<[u8]>),
    Missing(MissingReason),
}

impl LayerStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

impl From<FetchOutcome> for LayerStatus {
    fn from(outcome: FetchOutcome) -> Self {
        match outcome {
            Ok(bytes) => Self::Available(bytes.into()),
            Err(FetchError::NotFound) => Self::Missing(MissingReason::NotFound),
            Err(FetchError::Transient(_)) => Self::Missing(MissingReason::NetworkError),
            Err(FetchError::Malformed(_)) => Self::Missing(MissingReason::Malformed),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileRecord {
    pub id: TileId,
    pub bounds: BoundingBox,
    layers: BTreeMap<Layer, LayerStatus>,
}

impl TileRecord {
    pub fn new(id: TileId) -> Self {
        Self {
            id,
            bounds: tile_bounds(id),
            layers: BTreeMap::new(),
        }
    }

    pub fn set_layer(&mut self, layer: Layer, status: LayerStatus) {
        self.layers.insert(layer, status);
    }

    pub fn layer(&self, layer: Layer) -> Option<&LayerStatus> {
        self.layers.get(&layer)
    }

    pub fn payload(&self, layer: Layer) -> Option<&[u8]> {
        match self.layers.get(&layer) {
            Some(LayerStatus::Available(bytes)) => Some(&bytes[..]),
            _ => None,
        }
    }

    pub fn layers(&self) -> impl Iterator<Item = (Layer, &LayerStatus)> {
        self.layers.iter().map(|(layer, status)| (*layer, status))
    }

    pub fn resolved_layers(&self) -> LayerSet {
        self.layers.keys().copied().collect()
    }

    pub fn available_layers(&self) -> LayerSet {
        self.layers()
            .filter(|(_, status)| status.is_available())
            .map(|(layer, _)| layer)
            .collect()
    }

    /// A tile without a single successful layer is left out of the draw list.
    pub fn is_drawable(&self) -> bool {
        !self.available_layers().is_empty()
    }

    pub fn has_network_failure(&self) -> bool {
        self.layers
            .values()
            .any(|status| *status == LayerStatus::Missing(MissingReason::NetworkError))
    }

    pub fn byte_size(&self) -> usize {
        self.layers
            .values()
            .map(|status| match status {
                LayerStatus::Available(bytes) => bytes.len(),
                LayerStatus::Missing(_) => 0,
            })
            .sum()
    }
}

/// The unit of caching and GPU residency: the existing children of `id`,
/// ordered as `TileId::children` orders them.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadRecord {
    pub id: QuadId,
    pub tiles: Vec<TileRecord>,
}

impl QuadRecord {
    pub fn new(id: QuadId, mut tiles: Vec<TileRecord>) -> Self {
        tiles.sort_by_key(|tile| tile.id.child_index());
        Self { id, tiles }
    }

    pub fn tile(&self, id: TileId) -> Option<&TileRecord> {
        self.tiles.iter().find(|tile| tile.id == id)
    }

    pub fn is_drawable(&self) -> bool {
        self.tiles.iter().any(TileRecord::is_drawable)
    }

    pub fn has_network_failure(&self) -> bool {
        self.tiles.iter().any(TileRecord::has_network_failure)
    }

    pub fn byte_size(&self) -> usize {
        self.tiles.iter().map(TileRecord::byte_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_tile_keeps_successful_layers() {
        let mut tile = TileRecord::new(TileId::new(3, 4, 2));
        let height: FetchOutcome = Ok(vec![1, 2, 3]);
        let ortho: FetchOutcome = Err(FetchError::NotFound);
        tile.set_layer(Layer::Height, height.into());
        tile.set_layer(Layer::Ortho, ortho.into());
        assert_eq!(tile.available_layers(), LayerSet::empty().with(Layer::Height));
        assert_eq!(tile.resolved_layers().len(), 2);
        assert_eq!(tile.payload(Layer::Height), Some(&[1u8, 2, 3][..]));
        assert!(tile.payload(Layer::Ortho).is_none());
        assert!(tile.is_drawable());
        assert!(!tile.has_network_failure());
    }

    #[test]
    fn tile_without_layers_is_not_drawable() {
        let mut tile = TileRecord::new(TileId::new(1, 0, 0));
        let height: FetchOutcome = Err(FetchError::Transient("timeout".into()));
        tile.set_layer(Layer::Height, height.into());
        assert!(!tile.is_drawable());
        assert!(tile.has_network_failure());
    }

    #[test]
    fn quad_orders_tiles_by_child_position() {
        let parent = TileId::new(2, 1, 1);
        let [nw, ne, sw, se] = parent.children();
        let quad = QuadRecord::new(
            parent,
            vec![TileRecord::new(se), TileRecord::new(nw), TileRecord::new(sw), TileRecord::new(ne)],
        );
        let order: Vec<TileId> = quad.tiles.iter().map(|tile| tile.id).collect();
        assert_eq!(order, vec![nw, ne, sw, se]);
    }
}
