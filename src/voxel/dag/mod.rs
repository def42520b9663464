//! Sparse voxel DAG
//!
//! A reference-counted, hash-consed node arena shared by any number of
//! immutable index roots. Identical subtrees are stored once; edits build new
//! roots that share everything they did not touch.

pub mod payload;
pub mod node;
pub mod arena;
pub mod stats;
pub mod index;
pub mod traversal;

pub use payload::Payload;
pub use node::{DagNode, NodeId, NodeView};
pub use arena::{DagStore, NodeArena};
pub use stats::DagStats;
pub use index::SvdagIndex;
pub use traversal::{
    point_query, ray_march, ray_march_batch, ray_march_with, MarchLimits, MarchState,
    MarchStatus, RayHit, RayMarcher, RayResult,
};
