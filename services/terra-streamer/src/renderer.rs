use std::collections::HashMap;
use std::sync::Arc;
use terra_core::{QuadId, QuadRecord};
use terra_scheduler::GpuDelta;
use tracing::warn;

/// Stand-in for the renderer's GPU cache: holds exactly what the deltas say
/// is resident.
#[derive(Debug, Default)]
pub struct GpuMirror {
    quads: HashMap<QuadId, Arc<QuadRecord>>,
    uploads: u64,
}

impl GpuMirror {
    pub fn apply(&mut self, delta: GpuDelta) {
        for quad in delta.removed {
            if self.quads.remove(&quad).is_none() {
                warn!(%quad, "delta removed a quad that was not resident");
            }
        }
        for record in delta.added {
            let id = record.id;
            if self.quads.insert(id, record).is_some() {
                warn!(quad = %id, "delta added a quad that was already resident");
            }
            self.uploads += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.quads.len()
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// Tiles with at least one usable layer.
    pub fn drawable_tiles(&self) -> usize {
        self.quads
            .values()
            .flat_map(|quad| quad.tiles.iter())
            .filter(|tile| tile.is_drawable())
            .count()
    }

    pub fn resident_bytes(&self) -> usize {
        self.quads.values().map(|quad| quad.byte_size()).sum()
    }
}
