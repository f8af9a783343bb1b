use super::{Geodetic, Vec3, ecef_to_geodetic, geodetic_to_ecef};

/// Local East-North-Up offset (meters).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Enu {
    pub east: f64,
    pub north: f64,
    pub up: f64,
}

impl Enu {
    pub fn new(east: f64, north: f64, up: f64) -> Self {
        Self { east, north, up }
    }
}

pub fn ecef_to_enu(point: Vec3, origin: Geodetic) -> Enu {
    let d = point - geodetic_to_ecef(origin);

    let sin_lat = origin.lat_rad.sin();
    let cos_lat = origin.lat_rad.cos();
    let sin_lon = origin.lon_rad.sin();
    let cos_lon = origin.lon_rad.cos();

    let east = -sin_lon * d.x + cos_lon * d.y;
    let north = -sin_lat * cos_lon * d.x - sin_lat * sin_lon * d.y + cos_lat * d.z;
    let up = cos_lat * cos_lon * d.x + cos_lat * sin_lon * d.y + sin_lat * d.z;

    Enu::new(east, north, up)
}

pub fn enu_to_ecef(enu: Enu, origin: Geodetic) -> Vec3 {
    let sin_lat = origin.lat_rad.sin();
    let cos_lat = origin.lat_rad.cos();
    let sin_lon = origin.lon_rad.sin();
    let cos_lon = origin.lon_rad.cos();

    let dx = -sin_lon * enu.east - sin_lat * cos_lon * enu.north + cos_lat * cos_lon * enu.up;
    let dy = cos_lon * enu.east - sin_lat * sin_lon * enu.north + cos_lat * sin_lon * enu.up;
    let dz = cos_lat * enu.north + sin_lat * enu.up;

    geodetic_to_ecef(origin) + Vec3::new(dx, dy, dz)
}

/// Offsets an Earth-fixed point within its own local tangent frame.
pub fn offset_in_local_frame(point: Vec3, enu: Enu) -> Vec3 {
    let origin = ecef_to_geodetic(point);
    enu_to_ecef(enu, origin)
}

#[cfg(test)]
mod tests {
    use super::{Enu, ecef_to_enu, enu_to_ecef};
    use crate::math::{Geodetic, geodetic_to_ecef};

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    #[test]
    fn enu_round_trip_at_equator() {
        let origin = Geodetic::new(0.0, 0.0, 0.0);
        let enu = Enu::new(15.0, -8.0, 2.5);
        let enu_rt = ecef_to_enu(enu_to_ecef(enu, origin), origin);

        assert_close(enu_rt.east, enu.east, 1e-6);
        assert_close(enu_rt.north, enu.north, 1e-6);
        assert_close(enu_rt.up, enu.up, 1e-6);
    }

    #[test]
    fn enu_zero_at_origin() {
        let origin = Geodetic::new(0.1, -0.2, 35.0);
        let enu = ecef_to_enu(geodetic_to_ecef(origin), origin);
        assert_close(enu.east, 0.0, 1e-6);
        assert_close(enu.north, 0.0, 1e-6);
        assert_close(enu.up, 0.0, 1e-6);
    }
}
