use crate::math::{Geodetic, Vec3, geodetic_to_ecef};

/// Geographic extent in radians.
///
/// `east < west` denotes an extent crossing the antimeridian.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Rectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Rectangle {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Rectangle {
            west,
            south,
            east,
            north,
        }
    }

    pub fn from_degrees(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self::new(
            west.to_radians(),
            south.to_radians(),
            east.to_radians(),
            north.to_radians(),
        )
    }

    /// Smallest rectangle containing both corners.
    pub fn from_corners(a: Geodetic, b: Geodetic) -> Self {
        Self::new(
            a.lon_rad.min(b.lon_rad),
            a.lat_rad.min(b.lat_rad),
            a.lon_rad.max(b.lon_rad),
            a.lat_rad.max(b.lat_rad),
        )
    }

    pub fn width(&self) -> f64 {
        let mut east = self.east;
        if east < self.west {
            east += std::f64::consts::TAU;
        }
        east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn center(&self) -> Geodetic {
        let lon = crate::math::wrap_longitude(self.west + self.width() * 0.5);
        let lat = (self.south + self.north) * 0.5;
        Geodetic::new(lat, lon, 0.0)
    }

    pub fn contains(&self, point: Geodetic) -> bool {
        if point.lat_rad < self.south || point.lat_rad > self.north {
            return false;
        }
        let mut lon = point.lon_rad;
        let mut east = self.east;
        if east < self.west {
            east += std::f64::consts::TAU;
            if lon < self.west {
                lon += std::f64::consts::TAU;
            }
        }
        lon >= self.west && lon <= east
    }

    /// Bit pattern usable as a hash key.
    pub fn key(&self) -> [u64; 4] {
        [
            self.west.to_bits(),
            self.south.to_bits(),
            self.east.to_bits(),
            self.north.to_bits(),
        ]
    }
}

/// Bounding sphere in Earth-fixed coordinates.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f64,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f64) -> Self {
        BoundingSphere { center, radius }
    }

    pub fn from_geodetic(position: Geodetic, radius: f64) -> Self {
        Self::new(geodetic_to_ecef(position), radius)
    }

    /// Smallest sphere containing both `self` and `other`.
    pub fn union(&self, other: &BoundingSphere) -> BoundingSphere {
        let offset = other.center - self.center;
        let distance = offset.length();

        if self.radius >= distance + other.radius {
            return *self;
        }
        if other.radius >= distance + self.radius {
            return *other;
        }

        let radius = (self.radius + distance + other.radius) * 0.5;
        let Some(dir) = offset.normalize() else {
            return BoundingSphere::new(self.center, self.radius.max(other.radius));
        };
        let center = self.center + dir.scale(radius - self.radius);
        BoundingSphere::new(center, radius)
    }

    /// Union of every sphere; `None` for an empty input.
    pub fn from_spheres(spheres: &[BoundingSphere]) -> Option<BoundingSphere> {
        let (first, rest) = spheres.split_first()?;
        Some(rest.iter().fold(*first, |acc, s| acc.union(s)))
    }
}
