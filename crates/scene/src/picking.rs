use std::rc::Rc;

use foundation::Id;
use foundation::math::{Vec3, WGS84_A, WGS84_B};

use crate::data_source::Entity;
use crate::primitive::Primitive;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        Self { origin, dir }
    }

    pub fn at(&self, t: f64) -> Vec3 {
        self.origin + self.dir.scale(t)
    }
}

/// Nearest intersection of `ray` with the WGS84 ellipsoid, if any.
///
/// Solved in the frame where the ellipsoid is the unit sphere. Hits behind
/// the ray origin are ignored.
pub fn ray_ellipsoid_intersection(ray: &Ray) -> Option<Vec3> {
    let dir = ray.dir.normalize()?;
    let scale = |v: Vec3| Vec3::new(v.x / WGS84_A, v.y / WGS84_A, v.z / WGS84_B);
    let o = scale(ray.origin);
    let d = scale(dir);

    let a = d.dot(d);
    let b = 2.0 * o.dot(d);
    let c = o.dot(o) - 1.0;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    let sqrt_disc = disc.sqrt();
    let t0 = (-b - sqrt_disc) / (2.0 * a);
    let t1 = (-b + sqrt_disc) / (2.0 * a);
    let t = if t0 >= 0.0 {
        t0
    } else if t1 >= 0.0 {
        t1
    } else {
        return None;
    };
    Some(ray.origin + dir.scale(t))
}

/// One object found under a screen position by a drill pick.
#[derive(Debug, Clone, Default)]
pub struct PickedObject {
    pub entity: Option<Rc<Entity>>,
    pub primitive: Option<Rc<Primitive>>,
}

impl PickedObject {
    /// Name of the data source owning the picked entity.
    pub fn owner_name(&self) -> Option<String> {
        self.entity
            .as_ref()
            .and_then(|e| e.data_source())
            .map(|ds| ds.name().to_string())
    }

    /// Catalog item tagged on the primitive or on the entity's data source.
    pub fn owner_item(&self) -> Option<Id> {
        self.primitive
            .as_ref()
            .and_then(|p| p.owner_item())
            .or_else(|| {
                self.entity
                    .as_ref()
                    .and_then(|e| e.data_source())
                    .and_then(|ds| ds.owner_item())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{Ray, ray_ellipsoid_intersection};
    use foundation::math::{Vec3, WGS84_A, WGS84_B};

    fn assert_close(a: f64, b: f64, eps: f64) {
        assert!((a - b).abs() <= eps, "expected {a} ~= {b}");
    }

    #[test]
    fn hits_equator_from_above() {
        let ray = Ray::new(Vec3::new(WGS84_A * 2.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0));
        let hit = ray_ellipsoid_intersection(&ray).unwrap();
        assert_close(hit.x, WGS84_A, 1e-6);
    }

    #[test]
    fn hits_pole() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, WGS84_B * 3.0), Vec3::new(0.0, 0.0, -5.0));
        let hit = ray_ellipsoid_intersection(&ray).unwrap();
        assert_close(hit.z, WGS84_B, 1e-6);
    }

    #[test]
    fn misses_when_pointing_away() {
        let ray = Ray::new(Vec3::new(WGS84_A * 2.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert!(ray_ellipsoid_intersection(&ray).is_none());
        let tangent_miss = Ray::new(Vec3::new(WGS84_A * 2.0, WGS84_A * 2.0, 0.0), Vec3::new(-1.0, 0.0, 0.0));
        assert!(ray_ellipsoid_intersection(&tangent_miss).is_none());
    }
}
