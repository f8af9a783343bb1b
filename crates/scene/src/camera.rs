use std::f64::consts::TAU;

use foundation::math::{Geodetic, Vec3, ecef_to_geodetic, geodetic_to_ecef};
use foundation::{BoundingSphere, Rectangle};

/// Camera offset relative to a target, in the target's local frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HeadingPitchRange {
    pub heading: f64,
    pub pitch: f64,
    /// `None` lets the engine choose a distance.
    pub range: Option<f64>,
}

impl HeadingPitchRange {
    pub fn new(heading: f64, pitch: f64, range: Option<f64>) -> Self {
        Self {
            heading,
            pitch,
            range,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Orientation {
    HeadingPitch { heading: f64, pitch: f64 },
    DirectionUp { direction: Vec3, up: Vec3 },
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Frustum {
    pub fov_y: f64,
    pub aspect: f64,
}

/// Earth-fixed camera placement.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
}

/// East, north and up unit vectors at `origin`.
pub fn enu_basis(origin: Geodetic) -> (Vec3, Vec3, Vec3) {
    let (sin_lat, cos_lat) = origin.lat_rad.sin_cos();
    let (sin_lon, cos_lon) = origin.lon_rad.sin_cos();
    let east = Vec3::new(-sin_lon, cos_lon, 0.0);
    let north = Vec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
    let up = Vec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);
    (east, north, up)
}

impl CameraPose {
    pub fn looking_from(position: Geodetic, heading: f64, pitch: f64) -> Self {
        let (direction, up) = oriented_axes(position, heading, pitch);
        Self {
            position: geodetic_to_ecef(position),
            direction,
            up,
        }
    }

    /// Places the camera `range` meters away from `center`, looking at it.
    pub fn looking_at(center: Vec3, heading: f64, pitch: f64, range: f64) -> Self {
        let origin = if center.length() > 1.0 {
            ecef_to_geodetic(center)
        } else {
            Geodetic::new(0.0, 0.0, 0.0)
        };
        let (direction, up) = oriented_axes(origin, heading, pitch);
        Self {
            position: center - direction.scale(range),
            direction,
            up,
        }
    }

    pub fn right(&self) -> Vec3 {
        self.direction
            .cross(self.up)
            .normalize()
            .unwrap_or(Vec3::new(1.0, 0.0, 0.0))
    }

    pub fn geodetic(&self) -> Geodetic {
        ecef_to_geodetic(self.position)
    }

    /// Heading in `[0, 2π)` and pitch relative to the local horizon.
    pub fn heading_pitch(&self) -> (f64, f64) {
        let (east, north, up) = enu_basis(self.geodetic());
        let pitch = self.direction.dot(up).clamp(-1.0, 1.0).asin();
        let heading = if pitch.cos() > 1e-6 {
            self.direction.dot(east).atan2(self.direction.dot(north))
        } else {
            self.up.dot(east).atan2(self.up.dot(north))
        };
        (heading.rem_euclid(TAU), pitch)
    }
}

fn oriented_axes(origin: Geodetic, heading: f64, pitch: f64) -> (Vec3, Vec3) {
    let (east, north, up) = enu_basis(origin);
    let (sin_h, cos_h) = heading.sin_cos();
    let (sin_p, cos_p) = pitch.sin_cos();
    let direction = (east.scale(sin_h) + north.scale(cos_h)).scale(cos_p) + up.scale(sin_p);
    let right = east.scale(cos_h) - north.scale(sin_h);
    (direction, right.cross(direction))
}

/// A saved camera: the visible rectangle plus an optional exact pose.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraView {
    pub rectangle: Rectangle,
    pub position: Option<Vec3>,
    pub direction: Option<Vec3>,
    pub up: Option<Vec3>,
}

impl CameraView {
    pub fn from_rectangle(rectangle: Rectangle) -> Self {
        Self {
            rectangle,
            position: None,
            direction: None,
            up: None,
        }
    }

    pub fn from_pose(rectangle: Rectangle, pose: CameraPose) -> Self {
        Self {
            rectangle,
            position: Some(pose.position),
            direction: Some(pose.direction),
            up: Some(pose.up),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlightDestination {
    /// Looks straight down when no orientation is given.
    Position {
        destination: Vec3,
        orientation: Option<Orientation>,
    },
    Rectangle(Rectangle),
    BoundingSphere {
        sphere: BoundingSphere,
        offset: HeadingPitchRange,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Flight {
    pub destination: FlightDestination,
    pub duration_s: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlightOutcome {
    Completed,
    Cancelled,
}
