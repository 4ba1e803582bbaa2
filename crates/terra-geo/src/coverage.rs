use serde::{Deserialize, Serialize};

use crate::tile::{tile_bounds, TileId, MAX_SUPPORTED_ZOOM};
use crate::BoundingBox;

/// Structural shape of the served quadtree: how deep it goes and, optionally,
/// which geographic region has data at all. Tiles outside the shape do not
/// exist and are never requested or awaited.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileCoverage {
    pub max_zoom: u8,
    pub extent: Option<BoundingBox>,
}

impl TileCoverage {
    pub fn new(max_zoom: u8) -> Self {
        Self {
            max_zoom: max_zoom.min(MAX_SUPPORTED_ZOOM),
            extent: None,
        }
    }

    pub fn with_extent(mut self, extent: BoundingBox) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn exists(&self, tile: TileId) -> bool {
        if !tile.is_valid() || tile.zoom > self.max_zoom {
            return false;
        }
        match self.extent {
            Some(extent) => tile.zoom == 0 || tile_bounds(tile).intersects(&extent),
            None => true,
        }
    }

    /// Children of `quad` that exist in this tree; between zero and four.
    pub fn children(&self, quad: TileId) -> Vec<TileId> {
        if quad.zoom >= self.max_zoom {
            return Vec::new();
        }
        quad.children()
            .into_iter()
            .filter(|child| self.exists(*child))
            .collect()
    }
}

impl Default for TileCoverage {
    fn default() -> Self {
        Self::new(18)
    }
}
