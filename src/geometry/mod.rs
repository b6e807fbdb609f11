mod aabb;
mod ray_box_intersection;

use nalgebra::{Point3, RealField, Vector2, Vector3};
use thiserror::Error;

pub use aabb::AABB;

/// Id value marking "no primitive" / "no geometry".
pub const INVALID_ID: u32 = u32::MAX;

/// Scalar type the whole crate is generic over.
///
/// Implemented for `f32` and `f64`. `widen`/`narrow` are the exact casts used
/// by the double-precision fallback inside the triangle intersector; they must
/// stay lossless in the widening direction.
pub trait FloatType: RealField + Copy + Send + Sync {
    const EPSILON: Self;
    const INFINITY: Self;
    const MAX: Self;

    fn widen(self) -> f64;
    fn narrow(value: f64) -> Self;
}

impl FloatType for f32 {
    const EPSILON: Self = f32::EPSILON;
    const INFINITY: Self = f32::INFINITY;
    const MAX: Self = f32::MAX;

    fn widen(self) -> f64 {
        self as f64
    }

    fn narrow(value: f64) -> Self {
        value as f32
    }
}

impl FloatType for f64 {
    const EPSILON: Self = f64::EPSILON;
    const INFINITY: Self = f64::INFINITY;
    const MAX: Self = f64::MAX;

    fn widen(self) -> f64 {
        self
    }

    fn narrow(value: f64) -> Self {
        value
    }
}

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum RayError {
    #[error("ray direction must be non-zero")]
    ZeroDirection,
    #[error("ray range is empty (requires 0 <= min_t < max_t)")]
    EmptyRange,
}

/// Ray through the world, valid for distances in `[min_t, max_t]`.
///
/// The componentwise inverse direction and its signs are precomputed at
/// construction; a `±0` direction component turns into `±∞` following its
/// IEEE sign, which is exactly what the slab test needs.
#[derive(Copy, Clone, Debug)]
pub struct Ray<T: FloatType> {
    pub origin: Point3<T>,
    pub direction: Vector3<T>,
    pub direction_inv: Vector3<T>,
    pub direction_sign: [bool; 3],
    pub min_t: T,
    pub max_t: T,
    /// Accept the first discovered hit instead of searching for the nearest.
    pub any_hit: bool,
}

impl<T: FloatType> Ray<T> {
    /// Ray accepting hits anywhere in `[0, T::MAX]`.
    pub fn new(origin: Point3<T>, direction: Vector3<T>) -> Result<Ray<T>, RayError> {
        Self::with_range(origin, direction, T::zero(), T::MAX)
    }

    pub fn with_range(
        origin: Point3<T>,
        direction: Vector3<T>,
        min_t: T,
        max_t: T,
    ) -> Result<Ray<T>, RayError> {
        if direction == Vector3::zeros() {
            return Err(RayError::ZeroDirection);
        }
        if !(min_t >= T::zero() && max_t > min_t) {
            return Err(RayError::EmptyRange);
        }

        let direction_inv = direction.map(|x| T::one() / x);
        let direction_sign = [
            direction_inv[0] < T::zero(),
            direction_inv[1] < T::zero(),
            direction_inv[2] < T::zero(),
        ];

        Ok(Ray {
            origin,
            direction,
            direction_inv,
            direction_sign,
            min_t,
            max_t,
            any_hit: false,
        })
    }

    /// Switches the ray to any-hit mode.
    pub fn any_hit(mut self) -> Ray<T> {
        self.any_hit = true;
        self
    }

    pub fn point_at(&self, distance: T) -> Point3<T> {
        self.origin + self.direction * distance
    }
}

/// Intersection of a ray and the scene.
#[derive(Copy, Clone, Debug)]
pub struct Hit<T: FloatType> {
    /// Distance along the ray, in units of the (unnormalized) direction.
    pub distance: T,
    pub prim_id: u32,
    /// Id of the winning primitive class, as returned by scene registration.
    pub geom_id: u32,
    /// Surface coordinates; for triangles these recover the barycentric
    /// weights as `(1 - u - v, u, v)`.
    pub uv: Vector2<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{assert, let_assert};

    #[test]
    fn ray_rejects_zero_direction() {
        let result = Ray::<f32>::new(Point3::origin(), Vector3::zeros());
        let_assert!(Err(RayError::ZeroDirection) = result);
    }

    #[test]
    fn ray_rejects_negative_zero_direction() {
        let result = Ray::<f32>::new(Point3::origin(), Vector3::new(0.0, -0.0, 0.0));
        let_assert!(Err(RayError::ZeroDirection) = result);
    }

    #[test]
    fn ray_rejects_empty_range() {
        let direction = Vector3::new(0.0, 0.0, 1.0);
        let_assert!(
            Err(RayError::EmptyRange) =
                Ray::<f32>::with_range(Point3::origin(), direction, 1.0, 1.0)
        );
        let_assert!(
            Err(RayError::EmptyRange) =
                Ray::<f32>::with_range(Point3::origin(), direction, -1.0, 2.0)
        );
        let_assert!(
            Err(RayError::EmptyRange) =
                Ray::<f32>::with_range(Point3::origin(), direction, f32::NAN, 2.0)
        );
    }

    #[test]
    fn inverse_direction_signs() {
        let ray = Ray::<f32>::new(Point3::origin(), Vector3::new(-2.0, 0.0, 4.0)).unwrap();
        assert!(ray.direction_inv.x == -0.5);
        assert!(ray.direction_inv.y == f32::INFINITY);
        assert!(ray.direction_inv.z == 0.25);
        assert!(ray.direction_sign == [true, false, false]);
    }

    #[test]
    fn negative_zero_component_maps_to_negative_infinity() {
        let ray = Ray::<f64>::new(Point3::origin(), Vector3::new(1.0, -0.0, 0.0)).unwrap();
        assert!(ray.direction_inv.y == f64::NEG_INFINITY);
        assert!(ray.direction_sign == [false, true, false]);
    }

    #[test]
    fn point_at_walks_along_direction() {
        let ray = Ray::<f32>::new(Point3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 2.0, 0.0)).unwrap();
        assert!(ray.point_at(1.5) == Point3::new(1.0, 3.0, 0.0));
    }
}
