use std::collections::HashMap;
use terra_core::{QuadId, QuadRecord, TileRecord};
use terra_geo::TileCoverage;
use tracing::debug;

#[derive(Debug)]
pub enum QuadLoad {
    /// Load these child tiles; the quad completes once all are delivered.
    Started(Vec<QuadId>),
    /// The quad has no existing children and is complete as is.
    Complete(QuadRecord),
    AlreadyLoading,
}

#[derive(Debug)]
struct PendingQuad {
    expected: usize,
    tiles: Vec<TileRecord>,
}

/// Expands a quad into its existing children and joins their records.
#[derive(Debug)]
pub struct QuadAssembler {
    coverage: TileCoverage,
    pending: HashMap<QuadId, PendingQuad>,
}

impl QuadAssembler {
    pub fn new(coverage: TileCoverage) -> Self {
        Self {
            coverage,
            pending: HashMap::new(),
        }
    }

    pub fn load(&mut self, quad: QuadId) -> QuadLoad {
        if self.pending.contains_key(&quad) {
            return QuadLoad::AlreadyLoading;
        }
        let children = self.coverage.children(quad);
        if children.is_empty() {
            return QuadLoad::Complete(QuadRecord::new(quad, Vec::new()));
        }
        self.pending.insert(
            quad,
            PendingQuad {
                expected: children.len(),
                tiles: Vec::with_capacity(children.len()),
            },
        );
        QuadLoad::Started(children)
    }

    /// Adds a finished child tile. Returns the quad once its last child is in.
    pub fn deliver_tile(&mut self, tile: TileRecord) -> Option<QuadRecord> {
        let quad = tile.id.parent()?;
        let Some(pending) = self.pending.get_mut(&quad) else {
            debug!(tile = %tile.id, "dropping tile for a quad that is not loading");
            return None;
        };
        if pending.tiles.iter().any(|known| known.id == tile.id) {
            debug!(tile = %tile.id, "dropping duplicate tile delivery");
            return None;
        }
        pending.tiles.push(tile);
        if pending.tiles.len() < pending.expected {
            return None;
        }
        self.pending
            .remove(&quad)
            .map(|pending| QuadRecord::new(quad, pending.tiles))
    }

    pub fn is_loading(&self, quad: QuadId) -> bool {
        self.pending.contains_key(&quad)
    }

    pub fn loading(&self) -> usize {
        self.pending.len()
    }

    pub fn coverage(&self) -> &TileCoverage {
        &self.coverage
    }
}
