pub mod primitives;

use nalgebra::{Point3, Vector3};
use thiserror::Error;

use crate::bvh::{
    traverse, BuildError, BuildOptions, Bvh, IntersectPrimitive, PrimitiveCollection, TraceOptions,
};
use crate::geometry::{FloatType, Hit, Ray, AABB};

use primitives::{SphereSet, TriangleMesh};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("scene geometry is frozen after commit")]
    AlreadyCommitted,
    #[error("a {0} collection is already registered")]
    ClassAlreadyRegistered(&'static str),
    #[error("centers and radii differ in length: {centers} vs {radii}")]
    LengthMismatch { centers: usize, radii: usize },
    #[error("no primitives supplied")]
    EmptyInput,
    #[error(transparent)]
    Build(#[from] BuildError),
}

struct Registered<C, T: FloatType> {
    collection: C,
    geom_id: u32,
    bvh: Option<Bvh<T>>,
}

/// Scene facade: at most one collection per primitive class, one BVH each.
///
/// Registration hands out monotonically increasing geometry ids. After
/// [`Scene::commit`] the scene is frozen; queries only need `&self` and may
/// run concurrently.
pub struct Scene<'a, T: FloatType> {
    build_options: BuildOptions<T>,
    triangles: Option<Registered<TriangleMesh<'a, T>, T>>,
    spheres: Option<Registered<SphereSet<'a, T>, T>>,
    committed: bool,
    geometries: u32,
}

impl<'a, T: FloatType> Scene<'a, T> {
    pub fn new() -> Scene<'a, T> {
        Self::with_options(BuildOptions::default())
    }

    pub fn with_options(build_options: BuildOptions<T>) -> Scene<'a, T> {
        Scene {
            build_options,
            triangles: None,
            spheres: None,
            committed: false,
            geometries: 0,
        }
    }

    /// Registers a triangle mesh; `faces` indexes into `vertices`.
    pub fn add_triangles(
        &mut self,
        vertices: &'a [Point3<T>],
        faces: &'a [Vector3<u32>],
    ) -> Result<u32, SceneError> {
        if self.committed {
            return Err(SceneError::AlreadyCommitted);
        }
        if self.triangles.is_some() {
            return Err(SceneError::ClassAlreadyRegistered("triangle"));
        }
        if vertices.is_empty() || faces.is_empty() {
            return Err(SceneError::EmptyInput);
        }

        let geom_id = self.next_geom_id();
        self.triangles = Some(Registered {
            collection: TriangleMesh::new(vertices, faces),
            geom_id,
            bvh: None,
        });
        Ok(geom_id)
    }

    /// Registers a sphere set; `centers` and `radii` must run in parallel.
    pub fn add_spheres(
        &mut self,
        centers: &'a [Point3<T>],
        radii: &'a [T],
    ) -> Result<u32, SceneError> {
        if self.committed {
            return Err(SceneError::AlreadyCommitted);
        }
        if self.spheres.is_some() {
            return Err(SceneError::ClassAlreadyRegistered("sphere"));
        }
        let collection = SphereSet::new(centers, radii)?;
        if collection.is_empty() {
            return Err(SceneError::EmptyInput);
        }

        let geom_id = self.next_geom_id();
        self.spheres = Some(Registered {
            collection,
            geom_id,
            bvh: None,
        });
        Ok(geom_id)
    }

    fn next_geom_id(&mut self) -> u32 {
        let geom_id = self.geometries;
        self.geometries += 1;
        geom_id
    }

    /// Builds the BVH of every registered class and freezes the scene.
    /// Allowed once; an empty scene is refused.
    pub fn commit(&mut self) -> Result<(), SceneError> {
        if self.committed {
            return Err(SceneError::AlreadyCommitted);
        }
        if self.triangles.is_none() && self.spheres.is_none() {
            return Err(SceneError::EmptyInput);
        }

        if let Some(registered) = &mut self.triangles {
            registered.bvh = Some(Bvh::build(&registered.collection, &self.build_options)?);
        }
        if let Some(registered) = &mut self.spheres {
            registered.bvh = Some(Bvh::build(&registered.collection, &self.build_options)?);
        }

        self.committed = true;
        Ok(())
    }

    /// Nearest hit across all classes, or the first found in any-hit mode.
    ///
    /// Classes are tried in a fixed order (triangles, then spheres); on equal
    /// distances the class tried first wins. Returns `None` on an
    /// uncommitted scene.
    pub fn intersect(&self, ray: &Ray<T>, options: &TraceOptions) -> Option<Hit<T>> {
        let mut best = None;

        if intersect_class(self.triangles.as_ref(), ray, options, &mut best) {
            return best;
        }
        if intersect_class(self.spheres.as_ref(), ray, options, &mut best) {
            return best;
        }

        best
    }

    /// Union of the committed per-class bounds.
    pub fn bounding_box(&self) -> Option<AABB<T>> {
        let triangle_aabb = self.triangles.as_ref().and_then(|r| r.bvh.as_ref());
        let sphere_aabb = self.spheres.as_ref().and_then(|r| r.bvh.as_ref());

        let mut result: Option<AABB<T>> = None;
        for aabb in [triangle_aabb, sphere_aabb].into_iter().flatten() {
            let aabb = aabb.aabb();
            result = Some(match result {
                None => aabb.clone(),
                Some(accumulated) => accumulated.union(aabb),
            });
        }
        result
    }
}

impl<T: FloatType> Default for Scene<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Traverses one class and merges its result into `best` (strict-less-than,
/// so an earlier class keeps equal-distance wins). Returns true when the
/// query may stop because the ray only asked for any hit.
fn intersect_class<T, C>(
    registered: Option<&Registered<C, T>>,
    ray: &Ray<T>,
    options: &TraceOptions,
    best: &mut Option<Hit<T>>,
) -> bool
where
    T: FloatType,
    C: IntersectPrimitive<T>,
{
    let Some(registered) = registered else {
        return false;
    };
    let Some(bvh) = registered.bvh.as_ref() else {
        return false;
    };

    let state = registered.collection.prepare_ray(ray, options);
    let Some(mut hit) = traverse(bvh, &registered.collection, ray, &state) else {
        return false;
    };
    hit.geom_id = registered.geom_id;

    let better = match best {
        None => true,
        Some(previous) => hit.distance < previous.distance,
    };
    if better {
        *best = Some(hit);
    }
    ray.any_hit
}
