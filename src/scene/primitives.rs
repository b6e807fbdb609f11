use nalgebra::{Point3, Vector2, Vector3};

use crate::bvh::{IntersectPrimitive, PrimitiveCollection, PrimitiveHit, TraceOptions};
use crate::geometry::{FloatType, Ray, AABB};

use super::SceneError;

/// Indexed triangle mesh borrowing its vertex and face data.
///
/// Face indices are trusted to stay within the vertex slice.
pub struct TriangleMesh<'a, T: FloatType> {
    vertices: &'a [Point3<T>],
    faces: &'a [Vector3<u32>],
}

impl<'a, T: FloatType> TriangleMesh<'a, T> {
    pub fn new(vertices: &'a [Point3<T>], faces: &'a [Vector3<u32>]) -> TriangleMesh<'a, T> {
        TriangleMesh { vertices, faces }
    }

    fn corners(&self, prim_id: u32) -> [Point3<T>; 3] {
        let face = self.faces[prim_id as usize];
        [
            self.vertices[face[0] as usize],
            self.vertices[face[1] as usize],
            self.vertices[face[2] as usize],
        ]
    }
}

impl<T: FloatType> PrimitiveCollection<T> for TriangleMesh<'_, T> {
    fn len(&self) -> usize {
        self.faces.len()
    }

    fn aabb(&self, prim_id: u32) -> AABB<T> {
        let mut aabb = AABB::empty();
        for corner in self.corners(prim_id) {
            aabb.grow_point(&corner);
        }
        aabb
    }

    fn centroid(&self, prim_id: u32) -> Point3<T> {
        let [p0, p1, p2] = self.corners(prim_id);
        Point3::from((p0.coords + p1.coords + p2.coords) / T::narrow(3.0))
    }
}

/// Per-ray state of the watertight triangle test: the shear that maps the ray
/// onto the +z axis, plus the trace filters.
pub struct WatertightShear<T: FloatType> {
    /// Axis permutation; `k[2]` is the dominant direction axis.
    k: [usize; 3],
    /// Shear coefficients; `s[2]` is the depth scale `1 / direction[k2]`.
    s: [T; 3],
    options: TraceOptions,
}

impl<T: FloatType> IntersectPrimitive<T> for TriangleMesh<'_, T> {
    type RayState = WatertightShear<T>;

    fn prepare_ray(&self, ray: &Ray<T>, options: &TraceOptions) -> WatertightShear<T> {
        let k2 = ray.direction.iamax();
        let mut k0 = (k2 + 1) % 3;
        let mut k1 = (k2 + 2) % 3;
        // Keep the winding so that a ray running against the geometric normal
        // sees negative edge functions (the cullable back side).
        if ray.direction[k2] >= T::zero() {
            std::mem::swap(&mut k0, &mut k1);
        }

        let s2 = T::one() / ray.direction[k2];
        WatertightShear {
            k: [k0, k1, k2],
            s: [ray.direction[k0] * s2, ray.direction[k1] * s2, s2],
            options: *options,
        }
    }

    fn intersect_primitive(
        &self,
        state: &WatertightShear<T>,
        ray: &Ray<T>,
        prim_id: u32,
        best_t: T,
    ) -> Option<PrimitiveHit<T>> {
        if !state.options.allows(prim_id) {
            return None;
        }

        let [k0, k1, k2] = state.k;
        let [p0, p1, p2] = self.corners(prim_id);
        let a = p0 - ray.origin;
        let b = p1 - ray.origin;
        let c = p2 - ray.origin;

        let ax = a[k0] - state.s[0] * a[k2];
        let ay = a[k1] - state.s[1] * a[k2];
        let bx = b[k0] - state.s[0] * b[k2];
        let by = b[k1] - state.s[1] * b[k2];
        let cx = c[k0] - state.s[0] * c[k2];
        let cy = c[k1] - state.s[1] * c[k2];

        let mut u = cx * by - cy * bx;
        let mut v = ax * cy - ay * cx;
        let mut w = bx * ay - by * ax;

        // An exactly-zero edge function means the ray pierces an edge; redo
        // that term in double precision so shared edges resolve consistently
        // on both triangles.
        if u == T::zero() {
            u = T::narrow(cx.widen() * by.widen() - cy.widen() * bx.widen());
        }
        if v == T::zero() {
            v = T::narrow(ax.widen() * cy.widen() - ay.widen() * cx.widen());
        }
        if w == T::zero() {
            w = T::narrow(bx.widen() * ay.widen() - by.widen() * ax.widen());
        }

        if u < T::zero() || v < T::zero() || w < T::zero() {
            // Mixed signs miss; all-negative is a back-face hit.
            if state.options.cull_back_face
                || u > T::zero()
                || v > T::zero()
                || w > T::zero()
            {
                return None;
            }
        }

        let det = u + v + w;
        if det == T::zero() {
            return None;
        }

        let az = state.s[2] * a[k2];
        let bz = state.s[2] * b[k2];
        let cz = state.s[2] * c[k2];
        let t = (u * az + v * bz + w * cz) / det;

        // Written negated so NaN depths (degenerate input) also miss.
        if !(t <= best_t && t >= ray.min_t) {
            return None;
        }

        Some(PrimitiveHit {
            distance: t,
            uv: Vector2::new(v / det, w / det),
        })
    }
}

/// Set of spheres borrowing centers and radii.
pub struct SphereSet<'a, T: FloatType> {
    centers: &'a [Point3<T>],
    radii: &'a [T],
}

impl<'a, T: FloatType> SphereSet<'a, T> {
    pub fn new(centers: &'a [Point3<T>], radii: &'a [T]) -> Result<SphereSet<'a, T>, SceneError> {
        if centers.len() != radii.len() {
            return Err(SceneError::LengthMismatch {
                centers: centers.len(),
                radii: radii.len(),
            });
        }
        Ok(SphereSet { centers, radii })
    }
}

impl<T: FloatType> PrimitiveCollection<T> for SphereSet<'_, T> {
    fn len(&self) -> usize {
        self.centers.len()
    }

    fn aabb(&self, prim_id: u32) -> AABB<T> {
        let center = self.centers[prim_id as usize];
        let extent = Vector3::repeat(self.radii[prim_id as usize]);
        AABB::new(center - extent, center + extent)
    }

    fn centroid(&self, prim_id: u32) -> Point3<T> {
        self.centers[prim_id as usize]
    }
}

impl<T: FloatType> IntersectPrimitive<T> for SphereSet<'_, T> {
    type RayState = TraceOptions;

    fn prepare_ray(&self, _ray: &Ray<T>, options: &TraceOptions) -> TraceOptions {
        *options
    }

    fn intersect_primitive(
        &self,
        state: &TraceOptions,
        ray: &Ray<T>,
        prim_id: u32,
        best_t: T,
    ) -> Option<PrimitiveHit<T>> {
        if !state.allows(prim_id) {
            return None;
        }

        let center = self.centers[prim_id as usize];
        let radius = self.radii[prim_id as usize];
        let oc = ray.origin - center;

        let a = ray.direction.norm_squared();
        let b = T::narrow(2.0) * ray.direction.dot(&oc);
        let c = oc.norm_squared() - radius * radius;

        let discriminant = b * b - T::narrow(4.0) * a * c;
        if !(discriminant >= T::zero()) {
            return None;
        }

        // Citardauq-style root pairing avoids cancellation between b and the
        // discriminant root.
        let sqrt_disc = discriminant.sqrt();
        let q = if b < T::zero() {
            -(b - sqrt_disc) * T::narrow(0.5)
        } else {
            -(b + sqrt_disc) * T::narrow(0.5)
        };

        let (t0, t1) = if q == T::zero() {
            (T::zero(), T::zero())
        } else {
            (q / a, c / q)
        };
        let near = t0.min(t1);
        let far = t0.max(t1);

        let t = if near >= ray.min_t && near <= best_t {
            near
        } else if far >= ray.min_t && far <= best_t {
            far
        } else {
            return None;
        };

        let normal = (ray.point_at(t) - center) / radius;
        let u = normal.y.atan2(normal.x) / T::two_pi() + T::narrow(0.5);
        let v = normal.z.clamp(-T::one(), T::one()).acos() / T::pi();

        Some(PrimitiveHit {
            distance: t,
            uv: Vector2::new(u, v),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{assert, let_assert};
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn p3<T: FloatType>(x: f64, y: f64, z: f64) -> Point3<T> {
        Point3::new(T::narrow(x), T::narrow(y), T::narrow(z))
    }

    fn v3<T: FloatType>(x: f64, y: f64, z: f64) -> Vector3<T> {
        Vector3::new(T::narrow(x), T::narrow(y), T::narrow(z))
    }

    fn unit_triangle<T: FloatType>() -> (Vec<Point3<T>>, Vec<Vector3<u32>>) {
        let vertices = vec![p3(0.0, 0.0, 1.0), p3(1.0, 0.0, 1.0), p3(0.0, 1.0, 1.0)];
        let faces = vec![Vector3::new(0, 1, 2)];
        (vertices, faces)
    }

    fn triangle_hit_reports_exact_uv<T: FloatType>() {
        let (vertices, faces) = unit_triangle::<T>();
        let mesh = TriangleMesh::new(&vertices, &faces);

        let ray = Ray::new(p3(0.25, 0.25, 0.0), v3(0.0, 0.0, 1.0)).unwrap();
        let state = mesh.prepare_ray(&ray, &TraceOptions::default());
        let_assert!(Some(hit) = mesh.intersect_primitive(&state, &ray, 0, ray.max_t));

        assert!(hit.distance == T::one());
        assert!(hit.uv == Vector2::new(T::narrow(0.25), T::narrow(0.25)));
    }

    #[test]
    fn triangle_hit_f32() {
        triangle_hit_reports_exact_uv::<f32>();
    }

    #[test]
    fn triangle_hit_f64() {
        triangle_hit_reports_exact_uv::<f64>();
    }

    #[test]
    fn triangle_mesh_aabb_and_centroid() {
        let (vertices, faces) = unit_triangle::<f32>();
        let mesh = TriangleMesh::new(&vertices, &faces);

        assert!(mesh.len() == 1);
        let aabb = mesh.aabb(0);
        assert!(aabb.min == Point3::new(0.0, 0.0, 1.0));
        assert!(aabb.max == Point3::new(1.0, 1.0, 1.0));
        assert!(aabb.contains(&mesh.centroid(0)));
    }

    #[test]
    fn back_face_is_culled_on_request() {
        let (vertices, faces) = unit_triangle::<f32>();
        let mesh = TriangleMesh::new(&vertices, &faces);

        // Looking against the geometric normal: this is the back side.
        let ray = Ray::new(p3(0.25, 0.25, 2.0), v3(0.0, 0.0, -1.0)).unwrap();

        let culling = TraceOptions {
            cull_back_face: true,
            ..TraceOptions::default()
        };
        let state = mesh.prepare_ray(&ray, &culling);
        assert!(mesh.intersect_primitive(&state, &ray, 0, ray.max_t).is_none());

        let state = mesh.prepare_ray(&ray, &TraceOptions::default());
        let_assert!(Some(hit) = mesh.intersect_primitive(&state, &ray, 0, ray.max_t));
        assert!(hit.distance == 1.0);
    }

    #[test]
    fn front_face_survives_culling() {
        let (vertices, faces) = unit_triangle::<f32>();
        let mesh = TriangleMesh::new(&vertices, &faces);

        let ray = Ray::new(p3(0.25, 0.25, 0.0), v3(0.0, 0.0, 1.0)).unwrap();
        let culling = TraceOptions {
            cull_back_face: true,
            ..TraceOptions::default()
        };
        let state = mesh.prepare_ray(&ray, &culling);
        let_assert!(Some(hit) = mesh.intersect_primitive(&state, &ray, 0, ray.max_t));
        assert!(hit.distance == 1.0);
    }

    #[test]
    fn ray_outside_triangle_misses() {
        let (vertices, faces) = unit_triangle::<f32>();
        let mesh = TriangleMesh::new(&vertices, &faces);

        let ray = Ray::new(p3(0.75, 0.75, 0.0), v3(0.0, 0.0, 1.0)).unwrap();
        let state = mesh.prepare_ray(&ray, &TraceOptions::default());
        assert!(mesh.intersect_primitive(&state, &ray, 0, ray.max_t).is_none());
    }

    #[test]
    fn degenerate_triangle_misses_without_panicking() {
        let vertices = vec![
            p3::<f32>(0.0, 0.0, 1.0),
            p3(1.0, 0.0, 1.0),
            p3(2.0, 0.0, 1.0),
        ];
        let faces = vec![Vector3::new(0, 1, 2)];
        let mesh = TriangleMesh::new(&vertices, &faces);

        let ray = Ray::new(p3(0.5, 0.0, 0.0), v3(0.0, 0.0, 1.0)).unwrap();
        let state = mesh.prepare_ray(&ray, &TraceOptions::default());
        assert!(mesh.intersect_primitive(&state, &ray, 0, ray.max_t).is_none());
    }

    #[test]
    fn nan_vertex_misses_without_panicking() {
        let vertices = vec![
            p3::<f32>(f64::NAN, 0.0, 1.0),
            p3(1.0, 0.0, 1.0),
            p3(0.0, 1.0, 1.0),
        ];
        let faces = vec![Vector3::new(0, 1, 2)];
        let mesh = TriangleMesh::new(&vertices, &faces);

        let ray = Ray::new(p3(0.25, 0.25, 0.0), v3(0.0, 0.0, 1.0)).unwrap();
        let state = mesh.prepare_ray(&ray, &TraceOptions::default());
        assert!(mesh.intersect_primitive(&state, &ray, 0, ray.max_t).is_none());
    }

    /// Rays aimed at a shared edge must never fall through the crack: at
    /// least one of the two triangles reports the crossing, and when both do
    /// (the ray lies exactly on the edge) they agree on the distance, so a
    /// closest-hit query still reports the crossing exactly once.
    #[test]
    fn shared_edge_is_watertight() {
        let vertices = vec![
            p3::<f32>(0.0, 0.0, 1.0),
            p3(1.0, 0.0, 1.0),
            p3(0.0, 1.0, 1.0),
            p3(1.0, 1.0, 1.0),
        ];
        // Shared edge runs from (1,0,1) to (0,1,1).
        let faces = vec![Vector3::new(0, 1, 2), Vector3::new(1, 3, 2)];
        let mesh = TriangleMesh::new(&vertices, &faces);

        let mut rng = SmallRng::seed_from_u64(97);
        for _ in 0..10_000 {
            let x = rng.random_range(0.0f32..1.0);
            let origin = Point3::new(x, 1.0 - x, 0.0);
            let ray = Ray::new(origin, Vector3::new(0.0, 0.0, 1.0)).unwrap();
            let state = mesh.prepare_ray(&ray, &TraceOptions::default());

            let hits: Vec<_> = (0..2)
                .filter_map(|prim_id| {
                    mesh.intersect_primitive(&state, &ray, prim_id, ray.max_t)
                })
                .collect();
            assert!(!hits.is_empty(), "origin {origin:?} fell through the edge");
            for hit in &hits {
                assert!(hit.distance == 1.0);
            }
        }
    }

    #[test]
    fn sphere_closest_and_inside_hits() {
        let centers = vec![p3::<f32>(0.0, 0.0, 5.0)];
        let radii = vec![1.0f32];
        let spheres = SphereSet::new(&centers, &radii).unwrap();

        let ray = Ray::new(p3(0.0, 0.0, 0.0), v3(0.0, 0.0, 1.0)).unwrap();
        let state = spheres.prepare_ray(&ray, &TraceOptions::default());
        let_assert!(Some(hit) = spheres.intersect_primitive(&state, &ray, 0, ray.max_t));
        assert!(hit.distance == 4.0);

        // From the center the smaller root is behind the origin; the far
        // root must be taken.
        let ray = Ray::new(p3(0.0, 0.0, 5.0), v3(0.0, 0.0, 1.0)).unwrap();
        let state = spheres.prepare_ray(&ray, &TraceOptions::default());
        let_assert!(Some(hit) = spheres.intersect_primitive(&state, &ray, 0, ray.max_t));
        assert!(hit.distance == 1.0);
    }

    #[test]
    fn sphere_miss() {
        let centers = vec![p3::<f32>(0.0, 0.0, 5.0)];
        let radii = vec![1.0f32];
        let spheres = SphereSet::new(&centers, &radii).unwrap();

        let ray = Ray::new(p3(2.0, 0.0, 0.0), v3(0.0, 0.0, 1.0)).unwrap();
        let state = spheres.prepare_ray(&ray, &TraceOptions::default());
        assert!(spheres.intersect_primitive(&state, &ray, 0, ray.max_t).is_none());
    }

    #[test]
    fn sphere_hit_with_unnormalized_direction() {
        let centers = vec![p3::<f64>(0.0, 0.0, 5.0)];
        let radii = vec![1.0f64];
        let spheres = SphereSet::new(&centers, &radii).unwrap();

        // Direction of length 2: the reported distance halves.
        let ray = Ray::new(p3(0.0, 0.0, 0.0), v3(0.0, 0.0, 2.0)).unwrap();
        let state = spheres.prepare_ray(&ray, &TraceOptions::default());
        let_assert!(Some(hit) = spheres.intersect_primitive(&state, &ray, 0, ray.max_t));
        assert!(hit.distance == 2.0);
    }

    #[test]
    fn sphere_surface_uv_is_spherical() {
        let centers = vec![p3::<f32>(0.0, 0.0, 5.0)];
        let radii = vec![1.0f32];
        let spheres = SphereSet::new(&centers, &radii).unwrap();

        let ray = Ray::new(p3(0.0, 0.0, 0.0), v3(0.0, 0.0, 1.0)).unwrap();
        let state = spheres.prepare_ray(&ray, &TraceOptions::default());
        let_assert!(Some(hit) = spheres.intersect_primitive(&state, &ray, 0, ray.max_t));

        // Hit normal is (0, 0, -1): the south pole of the parameterization.
        assert!((hit.uv.x - 0.5).abs() < 1e-6);
        assert!((hit.uv.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sphere_set_rejects_mismatched_lengths() {
        let centers = vec![p3::<f32>(0.0, 0.0, 0.0)];
        let radii: Vec<f32> = Vec::new();
        let_assert!(
            Err(SceneError::LengthMismatch {
                centers: 1,
                radii: 0
            }) = SphereSet::new(&centers, &radii)
        );
    }

    #[test]
    fn sphere_aabb_wraps_center() {
        let centers = vec![p3::<f32>(1.0, 2.0, 3.0)];
        let radii = vec![0.5f32];
        let spheres = SphereSet::new(&centers, &radii).unwrap();

        let aabb = spheres.aabb(0);
        assert!(aabb.min == Point3::new(0.5, 1.5, 2.5));
        assert!(aabb.max == Point3::new(1.5, 2.5, 3.5));
        assert!(spheres.centroid(0) == centers[0]);
    }
}
