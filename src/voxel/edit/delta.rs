//! Edit operation representation.

use glam::UVec3;

use crate::core::types::Result;
use crate::math::region::Region;
use crate::voxel::dag::{Payload, SvdagIndex};

/// Type of edit operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditOp<P> {
    /// Set a single voxel to a specific value
    SetVoxel {
        position: UVec3,
        payload: P,
    },
    /// Clear a single voxel (make empty)
    ClearVoxel {
        position: UVec3,
    },
    /// Fill a region with a payload
    FillRegion {
        region: Region,
        payload: P,
    },
    /// Clear a region (make all empty)
    ClearRegion {
        region: Region,
    },
}

impl<P: Payload> EditOp<P> {
    /// Get the affected region of this edit.
    pub fn affected_region(&self) -> Region {
        match self {
            EditOp::SetVoxel { position, .. } | EditOp::ClearVoxel { position } => {
                Region::voxel(*position)
            }
            EditOp::FillRegion { region, .. } | EditOp::ClearRegion { region } => *region,
        }
    }

    /// Payload written by this edit.
    pub fn payload(&self) -> P {
        match self {
            EditOp::SetVoxel { payload, .. } | EditOp::FillRegion { payload, .. } => *payload,
            EditOp::ClearVoxel { .. } | EditOp::ClearRegion { .. } => P::default(),
        }
    }

    /// Value this edit writes at `pos`, or `None` if `pos` is untouched.
    pub fn evaluate_at(&self, pos: UVec3) -> Option<P> {
        self.affected_region()
            .contains_point(pos)
            .then(|| self.payload())
    }

    /// Apply to `index`, returning the edited index. `index` is unchanged.
    pub fn apply_to(&self, index: &SvdagIndex<P>) -> Result<SvdagIndex<P>> {
        match *self {
            EditOp::SetVoxel { position, payload } => {
                index.set(position.x, position.y, position.z, payload)
            }
            EditOp::ClearVoxel { position } => {
                index.set(position.x, position.y, position.z, P::default())
            }
            EditOp::FillRegion { region, payload } => index.merge_region(region, payload),
            EditOp::ClearRegion { region } => index.clear_region(region),
        }
    }
}
