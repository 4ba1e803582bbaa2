use glam::DVec3;
use std::time::Duration;
use terra_geo::CameraState;

/// A stored camera position; `x` latitude, `y` longitude, `z` altitude (m).
#[derive(Debug, Clone, Copy)]
pub struct Waypoint {
    pub name: &'static str,
    pub position: DVec3,
}

impl Waypoint {
    pub const fn new(name: &'static str, latitude: f64, longitude: f64, altitude_m: f64) -> Self {
        Self {
            name,
            position: DVec3::new(latitude, longitude, altitude_m),
        }
    }
}

/// Closed loop through waypoints, one leg per `leg_duration`, replayed to
/// drive the scheduler without a renderer attached.
#[derive(Debug, Clone)]
pub struct FlightPath {
    waypoints: Vec<Waypoint>,
    leg_duration: Duration,
}

impl FlightPath {
    pub fn new(waypoints: Vec<Waypoint>, leg_duration: Duration) -> Self {
        Self {
            waypoints,
            leg_duration: leg_duration.max(Duration::from_millis(1)),
        }
    }

    pub fn alpine_tour() -> Self {
        Self::new(
            vec![
                Waypoint::new("Vienna", 48.2082, 16.3738, 3_000.0),
                Waypoint::new("Hochschwab", 47.6180, 15.1430, 6_000.0),
                Waypoint::new("Grossglockner", 47.0742, 12.6947, 4_500.0),
                Waypoint::new("Innsbruck", 47.2692, 11.4041, 2_500.0),
                Waypoint::new("Salzburg", 47.8095, 13.0550, 12_000.0),
            ],
            Duration::from_secs(40),
        )
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn loop_duration(&self) -> Duration {
        self.leg_duration * self.waypoints.len() as u32
    }

    /// Camera after `elapsed` of flight, wrapping around at the end.
    pub fn camera_at(&self, elapsed: Duration) -> CameraState {
        let Some(first) = self.waypoints.first() else {
            return CameraState::new(0.0, 0.0, 20_000_000.0);
        };
        if self.waypoints.len() == 1 {
            return camera(first.position);
        }

        let leg_secs = self.leg_duration.as_secs_f64();
        let progress = (elapsed.as_secs_f64() % self.loop_duration().as_secs_f64()) / leg_secs;
        let leg = (progress.floor() as usize) % self.waypoints.len();
        let from = self.waypoints[leg].position;
        let to = self.waypoints[(leg + 1) % self.waypoints.len()].position;
        camera(from.lerp(to, smoothstep(progress.fract())))
    }
}

fn camera(position: DVec3) -> CameraState {
    CameraState::new(position.x, position.y, position.z)
}

fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stops() -> FlightPath {
        FlightPath::new(
            vec![
                Waypoint::new("a", 10.0, 20.0, 1_000.0),
                Waypoint::new("b", 12.0, 24.0, 3_000.0),
            ],
            Duration::from_secs(10),
        )
    }

    #[test]
    fn starts_at_first_waypoint() {
        let camera = two_stops().camera_at(Duration::ZERO);
        assert_eq!(camera.position.latitude, 10.0);
        assert_eq!(camera.position.longitude, 20.0);
        assert_eq!(camera.altitude_m(), 1_000.0);
    }

    #[test]
    fn halfway_through_a_leg_is_the_midpoint() {
        let camera = two_stops().camera_at(Duration::from_secs(5));
        assert!((camera.position.latitude - 11.0).abs() < 1e-9);
        assert!((camera.altitude_m() - 2_000.0).abs() < 1e-6);
    }

    #[test]
    fn path_wraps_around() {
        let path = two_stops();
        assert_eq!(path.loop_duration(), Duration::from_secs(20));
        let camera = path.camera_at(Duration::from_secs(40));
        assert_eq!(camera.position.latitude, 10.0);
        let returning = path.camera_at(Duration::from_secs(10));
        assert_eq!(returning.position.latitude, 12.0);
    }
}
