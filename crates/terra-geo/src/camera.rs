use serde::{Deserialize, Serialize};

use crate::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    pub position: Coordinate,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub field_of_view_deg: f64,
}

impl CameraState {
    pub fn new(latitude: f64, longitude: f64, altitude_m: f64) -> Self {
        Self {
            position: Coordinate::new(latitude, longitude).with_altitude(altitude_m),
            viewport_width: 1920,
            viewport_height: 1080,
            field_of_view_deg: 60.0,
        }
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    pub fn altitude_m(&self) -> f64 {
        self.position.altitude_m.unwrap_or(0.0).max(1.0)
    }

    /// Pixels covered by one meter seen at `distance_m`.
    pub fn pixels_per_meter(&self, distance_m: f64) -> f64 {
        let half_fov = (self.field_of_view_deg.clamp(1.0, 179.0) * 0.5).to_radians();
        self.viewport_height as f64 / (2.0 * half_fov.tan() * distance_m.max(1.0))
    }
}
