//! Voxel data structures and operations

pub mod voxel;
pub mod dag;
pub mod edit;

pub use voxel::Voxel;
pub use dag::{DagStore, Payload, SvdagIndex};
pub use edit::{EditHistory, EditOp};
