use assert2::debug_assert;
use index_vec::IndexVec;
use nalgebra::Vector3;
use thiserror::Error;

use crate::geometry::{FloatType, AABB};

use super::{BuildOptions, Bvh, Node, NodeIdx, NodeKind, PrimitiveCollection, MAX_STACK_DEPTH};

/// Ranges below this size are never worth forking.
const PARALLEL_THRESHOLD: usize = 1024;

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("primitive collection is empty")]
    EmptyInput,
    #[error("bin_size must be at least 2, got {got}")]
    BinSizeTooSmall { got: u32 },
    #[error("min_leaf_primitives must be at least 1")]
    ZeroLeafCapacity,
    #[error("max_tree_depth must be between 1 and {}, got {got}", MAX_STACK_DEPTH - 1)]
    TreeDepthOutOfRange { got: u32 },
}

/// Fork-join collaborator used by the builder for sibling subtrees. The
/// builder never owns threads; both tasks work on disjoint data.
pub trait Scheduler: Sync {
    fn fork_join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send;
}

/// Runs both tasks in order on the calling thread.
pub struct SingleThreaded;

impl Scheduler for SingleThreaded {
    fn fork_join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        let result_a = a();
        (result_a, b())
    }
}

/// Hands both tasks to the global rayon pool.
pub struct WorkStealing;

impl Scheduler for WorkStealing {
    fn fork_join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        rayon::join(a, b)
    }
}

/// Partition predicate of the split: does the primitive's centroid fall on
/// the low side of the cut?
fn split_predicate<T, C>(collection: &C, axis: usize, cut_pos: T, prim_id: u32) -> bool
where
    T: FloatType,
    C: PrimitiveCollection<T>,
{
    collection.centroid(prim_id)[axis] < cut_pos
}

#[derive(Clone, Debug)]
struct Bin<T: FloatType> {
    aabb: AABB<T>,
    count: u32,
    /// Cost of everything from this bin rightwards, filled by the sweep.
    cost: T,
}

impl<T: FloatType> Default for Bin<T> {
    fn default() -> Self {
        Bin {
            aabb: AABB::empty(),
            count: 0,
            cost: T::zero(),
        }
    }
}

/// `3 * size` bins, one row per axis. Reused across splits; `clear` resets
/// every bin, counts and boxes included.
struct BinBuffer<T: FloatType> {
    bins: Vec<Bin<T>>,
    size: usize,
}

impl<T: FloatType> BinBuffer<T> {
    fn new(size: usize) -> BinBuffer<T> {
        BinBuffer {
            bins: vec![Bin::default(); 3 * size],
            size,
        }
    }

    fn clear(&mut self) {
        self.bins.fill(Bin::default());
    }

    fn bin(&self, axis: usize, index: usize) -> &Bin<T> {
        &self.bins[axis * self.size + index]
    }

    fn bin_mut(&mut self, axis: usize, index: usize) -> &mut Bin<T> {
        &mut self.bins[axis * self.size + index]
    }
}

pub(super) fn build<T, C, S>(
    collection: &C,
    scheduler: &S,
    options: &BuildOptions<T>,
) -> Result<Bvh<T>, BuildError>
where
    T: FloatType,
    C: PrimitiveCollection<T> + Sync,
    S: Scheduler,
{
    options.validate()?;
    if collection.is_empty() {
        return Err(BuildError::EmptyInput);
    }

    let mut perm: Vec<u32> = (0..collection.len() as u32).collect();
    let mut builder = Builder::new(collection, scheduler, options);
    let root = builder.build_range(&mut perm, 0, 0);
    debug_assert!(root == Bvh::<T>::root());

    Ok(Bvh {
        nodes: builder.nodes,
        prim_indices: perm,
    })
}

struct Builder<'a, T: FloatType, C, S> {
    collection: &'a C,
    scheduler: &'a S,
    options: &'a BuildOptions<T>,
    nodes: IndexVec<NodeIdx, Node<T>>,
    bins: BinBuffer<T>,
}

impl<'a, T, C, S> Builder<'a, T, C, S>
where
    T: FloatType,
    C: PrimitiveCollection<T> + Sync,
    S: Scheduler,
{
    fn new(collection: &'a C, scheduler: &'a S, options: &'a BuildOptions<T>) -> Self {
        Builder {
            collection,
            scheduler,
            options,
            nodes: IndexVec::new(),
            bins: BinBuffer::new(options.bin_size as usize),
        }
    }

    /// Builds the subtree over `perm` and returns its root index. `base` is
    /// the offset of `perm` within the full permutation, so leaves always
    /// store absolute ranges.
    fn build_range(&mut self, perm: &mut [u32], base: u32, depth: u32) -> NodeIdx {
        let mut aabb = AABB::empty();
        for &prim_id in perm.iter() {
            aabb.grow(&self.collection.aabb(prim_id));
        }

        let count = perm.len();
        if count <= self.options.min_leaf_primitives as usize || depth >= self.options.max_tree_depth
        {
            return self.push_leaf(aabb, base, count);
        }

        let (axis, cut_pos) = self.find_best_split(perm, &aabb);
        let collection = self.collection;
        let mut mid = itertools::partition(perm.iter_mut(), |&prim_id| {
            split_predicate(collection, axis, cut_pos, prim_id)
        });
        if mid == 0 || mid == count {
            // All centroids landed on one side (coincident centroids or a
            // fully degenerate range); fall back to a median split. The leaf
            // guard above keeps count >= 2 here, so the median always splits.
            mid = count / 2;
        }
        debug_assert!(mid != 0 && mid != count);

        let node = self.nodes.push(Node {
            aabb,
            kind: NodeKind::Inner {
                left: NodeIdx::from_raw(0),
                right: NodeIdx::from_raw(0),
                axis,
            },
        });

        let (left_perm, right_perm) = perm.split_at_mut(mid);
        let (left, right) =
            if self.options.enable_parallel && count >= PARALLEL_THRESHOLD {
                self.fork_children(left_perm, right_perm, base, depth)
            } else {
                let left = self.build_range(left_perm, base, depth + 1);
                let right = self.build_range(right_perm, base + mid as u32, depth + 1);
                (left, right)
            };

        self.nodes[node].kind = NodeKind::Inner { left, right, axis };
        node
    }

    fn push_leaf(&mut self, aabb: AABB<T>, base: u32, count: usize) -> NodeIdx {
        self.nodes.push(Node {
            aabb,
            kind: NodeKind::Leaf {
                begin: base,
                end: base + count as u32,
            },
        })
    }

    /// Builds both children in fresh sub-builders via the scheduler and
    /// splices their node arrays back. Only the permutation halves are
    /// shared, and those are disjoint.
    fn fork_children(
        &mut self,
        left_perm: &mut [u32],
        right_perm: &mut [u32],
        base: u32,
        depth: u32,
    ) -> (NodeIdx, NodeIdx) {
        let mid = left_perm.len() as u32;
        let collection = self.collection;
        let scheduler = self.scheduler;
        let options = self.options;

        let (left_sub, right_sub) = scheduler.fork_join(
            move || {
                let mut builder = Builder::new(collection, scheduler, options);
                let root = builder.build_range(left_perm, base, depth + 1);
                (builder.nodes, root)
            },
            move || {
                let mut builder = Builder::new(collection, scheduler, options);
                let root = builder.build_range(right_perm, base + mid, depth + 1);
                (builder.nodes, root)
            },
        );

        let left = self.splice(left_sub.0, left_sub.1);
        let right = self.splice(right_sub.0, right_sub.1);
        (left, right)
    }

    /// Appends a subtree node array, rebasing its internal links.
    fn splice(&mut self, nodes: IndexVec<NodeIdx, Node<T>>, root: NodeIdx) -> NodeIdx {
        let offset = self.nodes.len() as u32;
        self.nodes.extend(nodes.into_iter().map(|mut node| {
            if let NodeKind::Inner { left, right, .. } = &mut node.kind {
                *left = NodeIdx::from_raw(left.raw() + offset);
                *right = NodeIdx::from_raw(right.raw() + offset);
            }
            node
        }));
        NodeIdx::from_raw(root.raw() + offset)
    }

    /// Binned SAH search over all three axes. Returns the axis and cut
    /// position with the cheapest split; degenerate axes never win unless
    /// every axis is degenerate.
    fn find_best_split(&mut self, perm: &[u32], enclosing: &AABB<T>) -> (usize, T) {
        let bin_count = self.bins.size;
        let size = enclosing.size();

        let mut inv_size = Vector3::<T>::zeros();
        for axis in 0..3 {
            if size[axis] > T::zero() {
                inv_size[axis] = T::one() / size[axis];
            }
        }

        self.bins.clear();
        let scale = T::narrow((bin_count - 1) as f64);
        for &prim_id in perm {
            let center = self.collection.centroid(prim_id);
            let prim_aabb = self.collection.aabb(prim_id);
            for axis in 0..3 {
                if inv_size[axis] > T::zero() {
                    let normalized = (center[axis] - enclosing.min[axis]) * inv_size[axis] * scale;
                    // Saturating cast clamps the low side, min() the high one.
                    let index = (normalized.floor().widen() as usize).min(bin_count - 1);
                    let bin = self.bins.bin_mut(axis, index);
                    bin.count += 1;
                    bin.aabb.grow(&prim_aabb);
                }
            }
        }

        let mut min_cost = [T::INFINITY; 3];
        let mut cut_pos = [T::zero(); 3];
        for axis in 0..3 {
            if inv_size[axis] <= T::zero() {
                continue;
            }

            // Right-to-left: store in every bin the cost of the partition
            // starting there.
            let mut accumulated = AABB::empty();
            let mut count = 0u32;
            for index in (1..bin_count).rev() {
                let bin = self.bins.bin_mut(axis, index);
                count += bin.count;
                accumulated.grow(&bin.aabb);
                bin.cost = partition_cost(count, &accumulated);
            }

            // Left-to-right: combine with the stored right-hand costs.
            let mut accumulated = AABB::empty();
            let mut count = 0u32;
            let mut best_bin = 1;
            let mut best_cost = T::INFINITY;
            for index in 0..bin_count - 1 {
                let bin = self.bins.bin(axis, index);
                count += bin.count;
                accumulated.grow(&bin.aabb);
                let cost = partition_cost(count, &accumulated) + self.bins.bin(axis, index + 1).cost;
                if cost < best_cost {
                    best_cost = cost;
                    best_bin = index + 1;
                }
            }

            min_cost[axis] = best_cost;
            cut_pos[axis] = enclosing.min[axis]
                + T::narrow(best_bin as f64) * size[axis] / T::narrow(bin_count as f64);
        }

        // Strict comparisons resolve ties towards the lowest axis.
        let mut best_axis = 0;
        if min_cost[0] > min_cost[1] {
            best_axis = 1;
        }
        if min_cost[best_axis] > min_cost[2] {
            best_axis = 2;
        }
        (best_axis, cut_pos[best_axis])
    }
}

fn partition_cost<T: FloatType>(count: u32, aabb: &AABB<T>) -> T {
    if count == 0 {
        // An empty side must not poison the sum with `0 * ∞`.
        T::zero()
    } else {
        T::narrow(count as f64) * aabb.surface_area()
    }
}
