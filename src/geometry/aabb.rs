use nalgebra::{Point3, Vector3};

use super::FloatType;

/// Axis-aligned bounding box.
///
/// An empty box uses `+∞ / -∞` sentinels so that growing it by any non-empty
/// box or point yields that box or point.
#[derive(Clone, Debug, PartialEq)]
pub struct AABB<T: FloatType> {
    pub min: Point3<T>,
    pub max: Point3<T>,
}

impl<T: FloatType> AABB<T> {
    pub fn new(min: Point3<T>, max: Point3<T>) -> AABB<T> {
        AABB { min, max }
    }

    pub fn empty() -> AABB<T> {
        AABB {
            min: Point3::new(T::INFINITY, T::INFINITY, T::INFINITY),
            max: Point3::new(-T::INFINITY, -T::INFINITY, -T::INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z)
    }

    /// Extends this box to also cover `other`.
    pub fn grow(&mut self, other: &AABB<T>) {
        self.min = inf(&self.min, &other.min);
        self.max = sup(&self.max, &other.max);
    }

    pub fn grow_point(&mut self, point: &Point3<T>) {
        self.min = inf(&self.min, point);
        self.max = sup(&self.max, point);
    }

    pub fn union(&self, other: &AABB<T>) -> AABB<T> {
        AABB {
            min: inf(&self.min, &other.min),
            max: sup(&self.max, &other.max),
        }
    }

    pub fn size(&self) -> Vector3<T> {
        self.max - self.min
    }

    pub fn center(&self) -> Point3<T> {
        Point3::from((self.min.coords + self.max.coords) * T::narrow(0.5))
    }

    pub fn surface_area(&self) -> T {
        let d = self.size();
        T::narrow(2.0) * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    pub fn contains(&self, point: &Point3<T>) -> bool {
        (0..3).all(|i| self.min[i] <= point[i] && point[i] <= self.max[i])
    }
}

/// Componentwise minimum of two points.
fn inf<T: FloatType>(a: &Point3<T>, b: &Point3<T>) -> Point3<T> {
    a.coords.zip_map(&b.coords, |x, y| x.min(y)).into()
}

/// Componentwise maximum of two points.
fn sup<T: FloatType>(a: &Point3<T>, b: &Point3<T>) -> Point3<T> {
    a.coords.zip_map(&b.coords, |x, y| x.max(y)).into()
}
