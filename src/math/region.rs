//! Integer voxel region (inclusive bounding box)

use crate::core::error::Error;
use crate::core::types::{Result, UVec3};

/// Axis-aligned voxel box with inclusive min and max corners
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    pub min: UVec3,
    pub max: UVec3,
}

impl Region {
    /// Create a region, rejecting `min > max` on any axis
    pub fn new(min: UVec3, max: UVec3) -> Result<Self> {
        if min.x > max.x || min.y > max.y || min.z > max.z {
            return Err(Error::InvalidRegion { min, max });
        }
        Ok(Self { min, max })
    }

    /// Single-voxel region
    pub fn voxel(p: UVec3) -> Self {
        Self { min: p, max: p }
    }

    /// Cube of `size` voxels per axis starting at `origin` (size >= 1)
    pub fn cube(origin: UVec3, size: u32) -> Self {
        debug_assert!(size > 0);
        Self {
            min: origin,
            max: origin + UVec3::splat(size - 1),
        }
    }

    /// Number of voxels per axis
    pub fn size(&self) -> UVec3 {
        self.max - self.min + UVec3::ONE
    }

    /// Total voxel count
    pub fn volume(&self) -> u64 {
        let s = self.size();
        s.x as u64 * s.y as u64 * s.z as u64
    }

    /// Check if voxel is inside
    pub fn contains_point(&self, p: UVec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Check if `other` lies entirely inside this region
    pub fn contains(&self, other: &Region) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    /// Check if two regions share at least one voxel
    pub fn intersects(&self, other: &Region) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Overlap of two regions, if any
    pub fn intersection(&self, other: &Region) -> Option<Region> {
        if !self.intersects(other) {
            return None;
        }
        Some(Region {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        })
    }

    /// Child octant cube of a power-of-two cell
    /// index: 0-7 representing xyz octant (bit 0=x, bit 1=y, bit 2=z)
    pub fn child_octant(origin: UVec3, half: u32, index: u8) -> UVec3 {
        origin
            + UVec3::new(
                if index & 1 != 0 { half } else { 0 },
                if index & 2 != 0 { half } else { 0 },
                if index & 4 != 0 { half } else { 0 },
            )
    }
}
