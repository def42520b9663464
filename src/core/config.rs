//! Index configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::morton::MAX_DEPTH;

/// Configuration shared by a store and the indices built in it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    /// Tree depth D; the volume spans 2^D voxels per axis.
    pub max_depth: u8,
    /// Arena ceiling. Allocations beyond this many live nodes fail with `ArenaExhausted`.
    pub max_nodes: usize,
    /// Optional step budget applied to every ray march.
    pub max_ray_steps: Option<u32>,
    /// Number of undo snapshots kept by `EditHistory`.
    pub history_limit: usize,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_nodes: 1 << 24,
            max_ray_steps: None,
            history_limit: 64,
        }
    }
}

impl DagConfig {
    /// Config for a cube of 2^depth voxels per axis, other fields default.
    pub fn with_depth(max_depth: u8) -> Self {
        Self {
            max_depth,
            ..Default::default()
        }
    }

    /// Check field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH {
            return Err(Error::InvalidDepth(self.max_depth));
        }
        if self.max_nodes == 0 {
            return Err(Error::Config("max_nodes must be non-zero".into()));
        }
        Ok(())
    }

    /// Write config as pretty JSON.
    pub fn save_sync(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read and validate a JSON config.
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: DagConfig = serde_json::from_str(&json)
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
