use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

use crate::{BoundingBox, Coordinate};

/// Deepest level whose grid size still fits a `u32` coordinate.
pub const MAX_SUPPORTED_ZOOM: u8 = 30;

/// Web-mercator quadtree node. `y` grows southwards from the north edge.
///
/// Ordering is by zoom first, so sorting a list of ids yields coarse tiles
/// before fine ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

/// A quad is named after its parent tile; its members are the parent's children.
pub type QuadId = TileId;

impl TileId {
    pub const ROOT: TileId = TileId { zoom: 0, x: 0, y: 0 };

    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    pub fn grid_size(zoom: u8) -> u32 {
        1u32 << zoom.min(MAX_SUPPORTED_ZOOM)
    }

    pub fn is_valid(&self) -> bool {
        self.zoom <= MAX_SUPPORTED_ZOOM
            && self.x < Self::grid_size(self.zoom)
            && self.y < Self::grid_size(self.zoom)
    }

    pub fn parent(&self) -> Option<TileId> {
        if self.zoom == 0 {
            return None;
        }
        Some(TileId::new(self.zoom - 1, self.x >> 1, self.y >> 1))
    }

    /// Children in row-major order: north-west, north-east, south-west, south-east.
    pub fn children(&self) -> [TileId; 4] {
        let zoom = self.zoom + 1;
        let x = self.x << 1;
        let y = self.y << 1;
        [
            TileId::new(zoom, x, y),
            TileId::new(zoom, x + 1, y),
            TileId::new(zoom, x, y + 1),
            TileId::new(zoom, x + 1, y + 1),
        ]
    }

    /// Position of this tile inside its parent's quad, matching `children()`.
    pub fn child_index(&self) -> usize {
        ((self.y & 1) * 2 + (self.x & 1)) as usize
    }

    pub fn containing(coord: Coordinate, zoom: u8) -> TileId {
        let zoom = zoom.min(MAX_SUPPORTED_ZOOM);
        let n = Self::grid_size(zoom) as f64;
        let lat = coord.latitude.clamp(-85.051_128_78, 85.051_128_78).to_radians();
        let x = ((coord.longitude + 180.0) / 360.0 * n).floor();
        let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) * 0.5 * n).floor();
        let max = n - 1.0;
        TileId::new(zoom, x.clamp(0.0, max) as u32, y.clamp(0.0, max) as u32)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

fn mercator_latitude(y: f64, n: f64) -> f64 {
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

pub fn tile_bounds(id: TileId) -> BoundingBox {
    let n = TileId::grid_size(id.zoom) as f64;
    let x = id.x as f64;
    let y = id.y as f64;
    BoundingBox {
        north: mercator_latitude(y, n),
        south: mercator_latitude(y + 1.0, n),
        east: (x + 1.0) / n * 360.0 - 180.0,
        west: x / n * 360.0 - 180.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_round_trip_to_parent() {
        let tile = TileId::new(5, 17, 11);
        for (index, child) in tile.children().iter().enumerate() {
            assert_eq!(child.parent(), Some(tile));
            assert_eq!(child.child_index(), index);
        }
        assert_eq!(TileId::ROOT.parent(), None);
    }

    #[test]
    fn sorting_puts_coarse_tiles_first() {
        let mut tiles = vec![
            TileId::new(3, 0, 0),
            TileId::new(1, 1, 1),
            TileId::new(2, 3, 0),
        ];
        tiles.sort();
        assert_eq!(tiles[0].zoom, 1);
        assert_eq!(tiles[2].zoom, 3);
    }

    #[test]
    fn containing_tile_covers_coordinate() {
        let vienna = Coordinate::new(48.2082, 16.3738);
        for zoom in [0, 4, 12, 18] {
            let tile = TileId::containing(vienna, zoom);
            assert!(tile.is_valid());
            assert!(tile_bounds(tile).contains(vienna), "zoom {zoom}");
        }
    }

    #[test]
    fn root_bounds_span_the_mercator_world() {
        let bounds = tile_bounds(TileId::ROOT);
        assert!((bounds.west + 180.0).abs() < 1e-9);
        assert!((bounds.east - 180.0).abs() < 1e-9);
        assert!((bounds.north - 85.0511).abs() < 1e-3);
        assert!((bounds.south + 85.0511).abs() < 1e-3);
    }
}
