pub mod error;
pub mod layer;
pub mod record;
pub mod time;

pub use error::{ErrorCode, FetchError, FetchOutcome, TerraError};
pub use layer::{Layer, LayerSet};
pub use record::{LayerStatus, MissingReason, QuadRecord, TileRecord};
pub use terra_geo::{tile_bounds, BoundingBox, QuadId, TileId, MAX_SUPPORTED_ZOOM};
pub use time::{now_epoch_millis, EpochMillis};
