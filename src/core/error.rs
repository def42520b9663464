//! Error types for the DAG index

use glam::UVec3;
use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    /// Coordinate outside `[0, extent)` on at least one axis
    #[error("coordinate ({x}, {y}, {z}) outside [0, {extent})")]
    OutOfRange { x: u64, y: u64, z: u64, extent: u64 },

    /// Node ceiling reached while allocating
    #[error("node arena exhausted ({capacity} nodes)")]
    ArenaExhausted { capacity: usize },

    /// Bounding box with min > max on some axis
    #[error("invalid region: min {min} exceeds max {max}")]
    InvalidRegion { min: UVec3, max: UVec3 },

    #[error("invalid depth {0}: expected 1..=21")]
    InvalidDepth(u8),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt index data: {0}")]
    Corrupt(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// True for errors a caller can recover from by retrying after compaction
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Error::ArenaExhausted { .. })
    }
}
