pub mod bvh;
pub mod geometry;
pub mod scene;
mod util;

pub use bvh::{
    traverse, BuildError, BuildOptions, Bvh, IntersectPrimitive, PrimitiveCollection,
    PrimitiveHit, Scheduler, SingleThreaded, Statistics, TraceOptions, WorkStealing,
};
pub use geometry::{FloatType, Hit, Ray, RayError, AABB, INVALID_ID};
pub use scene::{
    primitives::{SphereSet, TriangleMesh},
    Scene, SceneError,
};
pub use util::Stats;
