//! Edit driver over immutable index roots.
//!
//! Edits are described as operations, applied to produce a new root, and kept
//! as root snapshots for undo/redo. Snapshots share all untouched nodes, so a
//! deep history costs only the cells each edit rebuilt.

pub mod delta;
pub mod history;

pub use delta::EditOp;
pub use history::EditHistory;
