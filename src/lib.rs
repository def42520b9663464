//! Rkdag - sparse voxel DAG index with structural sharing
//!
//! Voxel volumes are stored as a directed acyclic graph of octree nodes in a
//! shared, content-addressed arena. Index roots are immutable values: edits
//! produce new roots, queries and ray marches run against any root while
//! others are being edited.

pub mod core;
pub mod math;
pub mod voxel;
pub mod streaming;

pub use crate::core::{DagConfig, Error, Result};
pub use crate::math::{MortonCodec, Ray, Region};
pub use crate::voxel::dag::{
    point_query, ray_march, ray_march_batch, DagStats, DagStore, MarchLimits, Payload,
    RayHit, RayMarcher, RayResult, SvdagIndex,
};
