use std::collections::HashMap;
use terra_core::{FetchOutcome, Layer, LayerSet, TileId, TileRecord};
use tracing::{debug, warn};

/// One loader call the pipeline owes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub tile: TileId,
    pub layer: Layer,
}

#[derive(Debug)]
pub enum LayerLoad {
    /// Issue these fetches; the tile completes once each is delivered.
    Fetch(Vec<FetchRequest>),
    /// Nothing to fetch, the tile is already complete.
    Complete(TileRecord),
    AlreadyLoading,
}

#[derive(Debug)]
struct PendingTile {
    record: TileRecord,
    outstanding: LayerSet,
}

/// Fans a tile out into one fetch per enabled layer and joins the results.
/// A tile completes once every layer resolved, successfully or not.
#[derive(Debug)]
pub struct LayerAssembler {
    layers: LayerSet,
    pending: HashMap<TileId, PendingTile>,
}

impl LayerAssembler {
    pub fn new(layers: LayerSet) -> Self {
        Self {
            layers,
            pending: HashMap::new(),
        }
    }

    pub fn load(&mut self, tile: TileId) -> LayerLoad {
        if self.pending.contains_key(&tile) {
            return LayerLoad::AlreadyLoading;
        }
        if self.layers.is_empty() {
            return LayerLoad::Complete(TileRecord::new(tile));
        }
        self.pending.insert(
            tile,
            PendingTile {
                record: TileRecord::new(tile),
                outstanding: self.layers,
            },
        );
        LayerLoad::Fetch(
            self.layers
                .iter()
                .map(|layer| FetchRequest { tile, layer })
                .collect(),
        )
    }

    /// Records one layer outcome. Returns the tile once its last layer is in.
    /// Outcomes for tiles or layers not awaited are dropped.
    pub fn deliver(&mut self, tile: TileId, layer: Layer, outcome: FetchOutcome) -> Option<TileRecord> {
        let Some(pending) = self.pending.get_mut(&tile) else {
            debug!(%tile, %layer, "dropping layer for a tile that is not loading");
            return None;
        };
        if !pending.outstanding.contains(layer) {
            debug!(%tile, %layer, "dropping duplicate layer delivery");
            return None;
        }

        if let Err(err) = &outcome {
            if err.is_transient() {
                warn!(%tile, %layer, error = %err, "layer fetch failed");
            } else {
                debug!(%tile, %layer, error = %err, "layer unavailable");
            }
        }
        pending.record.set_layer(layer, outcome.into());
        pending.outstanding.remove(layer);

        if pending.outstanding.is_empty() {
            self.pending.remove(&tile).map(|pending| pending.record)
        } else {
            None
        }
    }

    pub fn is_loading(&self, tile: TileId) -> bool {
        self.pending.contains_key(&tile)
    }

    pub fn loading(&self) -> usize {
        self.pending.len()
    }

    pub fn layers(&self) -> LayerSet {
        self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terra_core::{FetchError, LayerStatus, MissingReason};

    fn height_and_ortho() -> LayerSet {
        LayerSet::empty().with(Layer::Height).with(Layer::Ortho)
    }

    #[test]
    fn tile_completes_after_every_layer_resolves() {
        let tile = TileId::new(5, 3, 4);
        let mut layers = LayerAssembler::new(height_and_ortho());

        let LayerLoad::Fetch(requests) = layers.load(tile) else {
            panic!("expected fetches");
        };
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|request| request.tile == tile));

        assert!(layers.deliver(tile, Layer::Height, Ok(vec![1])).is_none());
        let record = layers
            .deliver(tile, Layer::Ortho, Err(FetchError::NotFound))
            .expect("tile complete");
        assert_eq!(record.payload(Layer::Height), Some(&[1u8][..]));
        assert_eq!(
            record.layer(Layer::Ortho),
            Some(&LayerStatus::Missing(MissingReason::NotFound))
        );
        assert!(!layers.is_loading(tile));
    }

    #[test]
    fn all_layers_failing_still_completes() {
        let tile = TileId::new(5, 3, 4);
        let mut layers = LayerAssembler::new(height_and_ortho());
        layers.load(tile);
        layers.deliver(tile, Layer::Height, Err(FetchError::Transient("timeout".into())));
        let record = layers
            .deliver(tile, Layer::Ortho, Err(FetchError::Malformed("bad magic".into())))
            .expect("tile complete");
        assert!(!record.is_drawable());
        assert!(record.has_network_failure());
    }

    #[test]
    fn no_enabled_layers_completes_immediately() {
        let tile = TileId::new(2, 0, 0);
        let mut layers = LayerAssembler::new(LayerSet::empty());
        let LayerLoad::Complete(record) = layers.load(tile) else {
            panic!("expected immediate completion");
        };
        assert_eq!(record.id, tile);
        assert_eq!(record.resolved_layers().len(), 0);
        assert_eq!(layers.loading(), 0);
    }

    #[test]
    fn duplicate_and_unexpected_deliveries_are_ignored() {
        let tile = TileId::new(5, 3, 4);
        let mut layers = LayerAssembler::new(height_and_ortho());
        assert!(matches!(layers.load(tile), LayerLoad::Fetch(_)));
        assert!(matches!(layers.load(tile), LayerLoad::AlreadyLoading));

        assert!(layers.deliver(tile, Layer::Height, Ok(vec![1])).is_none());
        assert!(layers.deliver(tile, Layer::Height, Ok(vec![2])).is_none());
        assert!(layers.deliver(tile, Layer::Vector, Ok(vec![3])).is_none());
        assert!(layers.deliver(TileId::new(5, 0, 0), Layer::Ortho, Ok(vec![4])).is_none());

        let record = layers.deliver(tile, Layer::Ortho, Ok(vec![5])).expect("tile complete");
        assert_eq!(record.payload(Layer::Height), Some(&[1u8][..]));
        assert!(layers.deliver(tile, Layer::Ortho, Ok(vec![6])).is_none());
    }
}
