mod building;
mod ray_bvh_intersection;

use nalgebra::{Point3, Vector2};

use crate::geometry::{FloatType, Ray, AABB, INVALID_ID};
use crate::util::Stats;

pub use building::{BuildError, Scheduler, SingleThreaded, WorkStealing};
pub use ray_bvh_intersection::traverse;

/// Capacity of the fixed traversal stack. `BuildOptions::max_tree_depth` is
/// validated against this so traversal never needs to allocate or spill.
pub const MAX_STACK_DEPTH: usize = 64;

index_vec::define_index_type! {
    pub struct NodeIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Inner {
        left: NodeIdx,
        right: NodeIdx,
        /// Axis the children were partitioned on; drives near/far ordering
        /// during traversal.
        axis: usize,
    },
    Leaf {
        /// Half-open range into the primitive permutation.
        begin: u32,
        end: u32,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node<T: FloatType> {
    pub aabb: AABB<T>,
    pub kind: NodeKind,
}

/// Bounding volume hierarchy over one primitive collection.
///
/// Node 0 is the root. Built once by [`Bvh::build`]; immutable afterwards, so
/// concurrent queries against a shared reference are safe.
#[derive(Clone, Debug)]
pub struct Bvh<T: FloatType> {
    pub(crate) nodes: index_vec::IndexVec<NodeIdx, Node<T>>,
    /// Permutation of `0..collection.len()`; leaves reference contiguous
    /// slices of it.
    pub(crate) prim_indices: Vec<u32>,
}

impl<T: FloatType> PartialEq for Bvh<T> {
    fn eq(&self, other: &Self) -> bool {
        self.nodes.raw == other.nodes.raw && self.prim_indices == other.prim_indices
    }
}

impl<T: FloatType> Bvh<T> {
    /// Builds the tree, picking the scheduler from
    /// `options.enable_parallel`.
    pub fn build<C>(collection: &C, options: &BuildOptions<T>) -> Result<Bvh<T>, BuildError>
    where
        C: PrimitiveCollection<T> + Sync,
    {
        if options.enable_parallel {
            Self::build_with(collection, &WorkStealing, options)
        } else {
            Self::build_with(collection, &SingleThreaded, options)
        }
    }

    /// Builds the tree with an explicitly injected fork-join scheduler.
    pub fn build_with<C, S>(
        collection: &C,
        scheduler: &S,
        options: &BuildOptions<T>,
    ) -> Result<Bvh<T>, BuildError>
    where
        C: PrimitiveCollection<T> + Sync,
        S: Scheduler,
    {
        building::build(collection, scheduler, options)
    }

    /// World bounds of everything in the tree.
    pub fn aabb(&self) -> &AABB<T> {
        &self.nodes[Self::root()].aabb
    }

    pub(crate) fn root() -> NodeIdx {
        NodeIdx::from_raw(0)
    }

    pub fn statistics(&self) -> Statistics {
        self.subtree_statistics(Self::root(), 0)
    }

    fn subtree_statistics(&self, index: NodeIdx, depth: usize) -> Statistics {
        match self.nodes[index].kind {
            NodeKind::Leaf { begin, end } => {
                let mut leaf_primitives = Stats::default();
                leaf_primitives.add_sample((end - begin) as usize);
                Statistics {
                    inner_nodes: 0,
                    leaf_nodes: 1,
                    max_depth: depth,
                    leaf_primitives,
                }
            }
            NodeKind::Inner { left, right, .. } => {
                let left = self.subtree_statistics(left, depth + 1);
                let right = self.subtree_statistics(right, depth + 1);
                Statistics {
                    inner_nodes: left.inner_nodes + right.inner_nodes + 1,
                    leaf_nodes: left.leaf_nodes + right.leaf_nodes,
                    max_depth: left.max_depth.max(right.max_depth),
                    leaf_primitives: left.leaf_primitives.merge(&right.leaf_primitives),
                }
            }
        }
    }
}

/// Tree shape diagnostics reported by [`Bvh::statistics`].
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    pub inner_nodes: usize,
    pub leaf_nodes: usize,
    pub max_depth: usize,
    pub leaf_primitives: Stats,
}

impl std::fmt::Display for Statistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} inner nodes, {} leaves, max depth {}, primitives per leaf: {}",
            self.inner_nodes, self.leaf_nodes, self.max_depth, self.leaf_primitives
        )
    }
}

/// Knobs of the binned SAH build.
#[derive(Clone, Debug)]
pub struct BuildOptions<T: FloatType> {
    /// Number of bins per axis for the SAH sweep.
    pub bin_size: u32,
    /// Ranges at most this large become leaves.
    pub min_leaf_primitives: u32,
    /// Hard depth limit; must stay below [`MAX_STACK_DEPTH`].
    pub max_tree_depth: u32,
    /// Relative cost of visiting an inner node. Reserved for cost-model
    /// tuning; the active split search minimizes the unscaled SAH.
    pub traversal_cost: T,
    /// Relative cost of one primitive intersection. Reserved like
    /// `traversal_cost`.
    pub intersection_cost: T,
    /// Allow the builder to hand sibling subtrees to the scheduler.
    pub enable_parallel: bool,
}

impl<T: FloatType> Default for BuildOptions<T> {
    fn default() -> Self {
        BuildOptions {
            bin_size: 16,
            min_leaf_primitives: 4,
            max_tree_depth: 32,
            traversal_cost: T::one(),
            intersection_cost: T::one(),
            enable_parallel: false,
        }
    }
}

impl<T: FloatType> BuildOptions<T> {
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.bin_size < 2 {
            return Err(BuildError::BinSizeTooSmall { got: self.bin_size });
        }
        if self.min_leaf_primitives < 1 {
            return Err(BuildError::ZeroLeafCapacity);
        }
        if self.max_tree_depth < 1 || self.max_tree_depth as usize >= MAX_STACK_DEPTH {
            return Err(BuildError::TreeDepthOutOfRange {
                got: self.max_tree_depth,
            });
        }
        Ok(())
    }
}

/// Filters applied while tracing.
#[derive(Clone, Copy, Debug)]
pub struct TraceOptions {
    /// Reject hits on the side where all edge functions come out negative.
    pub cull_back_face: bool,
    /// Primitive id never reported (self-intersection exclusion);
    /// [`INVALID_ID`] disables the filter.
    pub skip_prim_id: u32,
    /// Half-open window of primitive ids that may be hit.
    pub prim_ids_range: [u32; 2],
}

impl Default for TraceOptions {
    fn default() -> Self {
        TraceOptions {
            cull_back_face: false,
            skip_prim_id: INVALID_ID,
            prim_ids_range: [0, u32::MAX],
        }
    }
}

impl TraceOptions {
    pub(crate) fn allows(&self, prim_id: u32) -> bool {
        prim_id != self.skip_prim_id
            && self.prim_ids_range[0] <= prim_id
            && prim_id < self.prim_ids_range[1]
    }
}

/// Uniform read-only view of a primitive collection, as consumed by the
/// builder. Implementations must be pure and O(1) per call.
pub trait PrimitiveCollection<T: FloatType> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tight world-space bounds of one primitive.
    fn aabb(&self, prim_id: u32) -> AABB<T>;

    /// A point on or inside `aabb(prim_id)`; this is what gets binned.
    fn centroid(&self, prim_id: u32) -> Point3<T>;
}

/// Distance and surface coordinates of a single primitive intersection.
#[derive(Copy, Clone, Debug)]
pub struct PrimitiveHit<T: FloatType> {
    pub distance: T,
    pub uv: Vector2<T>,
}

/// Class-specific intersection routine driven by [`traverse`].
///
/// `RayState` carries whatever the class precomputes once per ray (the
/// watertight shear for triangles, just the filter window for spheres).
pub trait IntersectPrimitive<T: FloatType> {
    type RayState;

    fn prepare_ray(&self, ray: &Ray<T>, options: &TraceOptions) -> Self::RayState;

    /// Tests one primitive. Hits beyond `best_t` or before `ray.min_t` are
    /// rejected; the id filters from the trace options are applied before any
    /// math.
    fn intersect_primitive(
        &self,
        state: &Self::RayState,
        ray: &Ray<T>,
        prim_id: u32,
        best_t: T,
    ) -> Option<PrimitiveHit<T>>;
}
