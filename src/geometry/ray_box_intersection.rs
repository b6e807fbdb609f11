use super::{FloatType, Ray, AABB};

impl<T: FloatType> AABB<T> {
    /// Slab test against `ray`, restricted to the interval `[t_min, t_max]`.
    ///
    /// The far plane distance is inflated by `1 + 4ε` so that rays grazing a
    /// node boundary shared by adjacent geometry are never rejected on both
    /// sides. NaN slab distances (origin on a degenerate slab, parallel ray)
    /// fall out of the max/min updates and leave the interval unchanged.
    pub fn intersect_ray(&self, ray: &Ray<T>, t_min: T, t_max: T) -> bool {
        let pad = T::one() + T::narrow(4.0) * T::EPSILON;

        let mut t_min = t_min;
        let mut t_max = t_max;
        for axis in 0..3 {
            let (near, far) = if ray.direction_sign[axis] {
                (self.max[axis], self.min[axis])
            } else {
                (self.min[axis], self.max[axis])
            };

            let t_near = (near - ray.origin[axis]) * ray.direction_inv[axis];
            let t_far = (far - ray.origin[axis]) * ray.direction_inv[axis] * pad;

            t_min = t_min.max(t_near);
            t_max = t_max.min(t_far);
        }

        t_min <= t_max
    }
}
