use arrayvec::ArrayVec;

use crate::geometry::{FloatType, Hit, Ray, INVALID_ID};

use super::{Bvh, IntersectPrimitive, NodeIdx, NodeKind, MAX_STACK_DEPTH};

/// Depth-first traversal of one tree.
///
/// Inner children are pushed far-side first (decided by the ray's direction
/// sign on the node's split axis), so the near subtree is tested first and
/// tightens `t_max` as early as possible. In any-hit mode the first accepted
/// primitive is returned immediately.
///
/// The returned hit has `geom_id` still set to [`INVALID_ID`]; the scene
/// stamps the class id on top.
pub fn traverse<T, C>(
    bvh: &Bvh<T>,
    primitives: &C,
    ray: &Ray<T>,
    state: &C::RayState,
) -> Option<Hit<T>>
where
    T: FloatType,
    C: IntersectPrimitive<T>,
{
    // Option validation bounds the tree depth below MAX_STACK_DEPTH, and the
    // stack grows by at most one net entry per popped inner node.
    let mut stack: ArrayVec<NodeIdx, MAX_STACK_DEPTH> = ArrayVec::new();
    let mut t_max = ray.max_t;
    let mut best: Option<Hit<T>> = None;

    stack.push(Bvh::<T>::root());
    while let Some(index) = stack.pop() {
        let node = &bvh.nodes[index];
        if !node.aabb.intersect_ray(ray, ray.min_t, t_max) {
            continue;
        }

        match node.kind {
            NodeKind::Leaf { begin, end } => {
                for &prim_id in &bvh.prim_indices[begin as usize..end as usize] {
                    let Some(hit) = primitives.intersect_primitive(state, ray, prim_id, t_max)
                    else {
                        continue;
                    };

                    // Equal distances resolve to the smaller primitive id so
                    // results are stable across tree shapes.
                    let accept = match &best {
                        None => true,
                        Some(previous) => {
                            hit.distance < previous.distance
                                || (hit.distance == previous.distance
                                    && prim_id < previous.prim_id)
                        }
                    };
                    if accept {
                        t_max = hit.distance;
                        best = Some(Hit {
                            distance: hit.distance,
                            prim_id,
                            geom_id: INVALID_ID,
                            uv: hit.uv,
                        });
                        if ray.any_hit {
                            return best;
                        }
                    }
                }
            }
            NodeKind::Inner { left, right, axis } => {
                let (near, far) = if ray.direction_sign[axis] {
                    (right, left)
                } else {
                    (left, right)
                };
                stack.push(far);
                stack.push(near);
            }
        }
    }

    best
}
