use std::collections::HashSet;

use crate::camera::CameraState;
use crate::coverage::TileCoverage;
use crate::tile::{tile_bounds, TileId};

/// Decides which tiles a camera needs. Implementations must be pure: the
/// same camera always yields the same set.
pub trait Culling: Send {
    /// Every tile reached while refining from the root for `camera`, coarse
    /// ancestors included. Siblings always appear together, so the parents of
    /// this set are exactly the quads the camera needs.
    fn needed_tiles(&self, camera: &CameraState) -> HashSet<TileId>;

    fn is_needed(&self, tile: TileId, camera: &CameraState) -> bool {
        self.needed_tiles(camera).contains(&tile)
    }

    /// The finest needed tiles, i.e. what a renderer draws once everything
    /// is loaded.
    fn draw_list(&self, camera: &CameraState) -> Vec<TileId> {
        let needed = self.needed_tiles(camera);
        let mut leaves: Vec<TileId> = needed
            .iter()
            .copied()
            .filter(|tile| !tile.children().iter().any(|child| needed.contains(child)))
            .collect();
        leaves.sort();
        leaves
    }
}

/// Refines a tile while its texels would appear larger than
/// `error_threshold_px` on screen.
#[derive(Debug, Clone, Copy)]
pub struct ScreenSpaceErrorCulling {
    pub coverage: TileCoverage,
    pub tile_resolution_px: f64,
    pub error_threshold_px: f64,
}

impl ScreenSpaceErrorCulling {
    pub fn new(coverage: TileCoverage) -> Self {
        Self {
            coverage,
            tile_resolution_px: 256.0,
            error_threshold_px: 1.0,
        }
    }

    fn should_refine(&self, tile: TileId, camera: &CameraState) -> bool {
        if tile == TileId::ROOT {
            return true;
        }
        if tile.zoom >= self.coverage.max_zoom {
            return false;
        }
        let bounds = tile_bounds(tile);
        let ground = bounds.ground_distance_m(camera.position);
        let altitude = camera.altitude_m();
        let distance = (ground * ground + altitude * altitude).sqrt();
        let texel_m = bounds.width_m() / self.tile_resolution_px;
        texel_m * camera.pixels_per_meter(distance) > self.error_threshold_px
    }
}

impl Culling for ScreenSpaceErrorCulling {
    fn needed_tiles(&self, camera: &CameraState) -> HashSet<TileId> {
        let mut needed = HashSet::new();
        let mut stack = vec![TileId::ROOT];
        while let Some(tile) = stack.pop() {
            if !self.should_refine(tile, camera) {
                continue;
            }
            for child in self.coverage.children(tile) {
                needed.insert(child);
                stack.push(child);
            }
        }
        needed
    }

    fn is_needed(&self, tile: TileId, camera: &CameraState) -> bool {
        if tile.zoom == 0 || !self.coverage.exists(tile) {
            return false;
        }
        let mut ancestor = tile.parent();
        while let Some(parent) = ancestor {
            if !self.should_refine(parent, camera) {
                return false;
            }
            ancestor = parent.parent();
        }
        true
    }
}
