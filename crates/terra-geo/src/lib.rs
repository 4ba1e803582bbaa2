use serde::{Deserialize, Serialize};

mod camera;
mod coverage;
mod culling;
mod tile;

pub use camera::CameraState;
pub use coverage::TileCoverage;
pub use culling::{Culling, ScreenSpaceErrorCulling};
pub use tile::{tile_bounds, QuadId, TileId, MAX_SUPPORTED_ZOOM};

pub const EARTH_RADIUS_M: f64 = 6_378_137.0;
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: Option<f64>,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude_m: None,
        }
    }

    pub fn with_altitude(mut self, altitude_m: f64) -> Self {
        self.altitude_m = Some(altitude_m);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    pub fn contains(&self, coord: Coordinate) -> bool {
        coord.latitude <= self.north
            && coord.latitude >= self.south
            && coord.longitude <= self.east
            && coord.longitude >= self.west
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.south < other.north
            && self.north > other.south
            && self.west < other.east
            && self.east > other.west
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.north + self.south) * 0.5,
            (self.east + self.west) * 0.5,
        )
    }

    /// East-west extent in meters, measured at the box's central latitude.
    pub fn width_m(&self) -> f64 {
        let lat = self.center().latitude.to_radians();
        (self.east - self.west) * lat.cos() * METERS_PER_DEGREE
    }

    /// Ground distance in meters from `coord` to the nearest point of the box.
    /// Uses an equirectangular approximation, which is good enough for
    /// refinement decisions.
    pub fn ground_distance_m(&self, coord: Coordinate) -> f64 {
        let lat = coord.latitude.clamp(self.south, self.north);
        let lon = coord.longitude.clamp(self.west, self.east);
        let mean_lat = ((lat + coord.latitude) * 0.5).to_radians();
        let dx = (coord.longitude - lon) * mean_lat.cos() * METERS_PER_DEGREE;
        let dy = (coord.latitude - lat) * METERS_PER_DEGREE;
        (dx * dx + dy * dy).sqrt()
    }
}
