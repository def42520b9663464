//! Voxel material payload

use bytemuck::{Pod, Zeroable};

use super::dag::Payload;

/// Convert RGB888 to RGB565
pub fn rgb_to_565(r: u8, g: u8, b: u8) -> u16 {
    let r5 = (r as u16 >> 3) & 0x1F;
    let g6 = (g as u16 >> 2) & 0x3F;
    let b5 = (b as u16 >> 3) & 0x1F;
    (r5 << 11) | (g6 << 5) | b5
}

/// Material stored in DAG leaves - exactly 4 bytes, so identical materials
/// hash and deduplicate as plain bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Voxel {
    /// RGB565 encoded color
    pub color: u16,
    pub material_id: u8,
    pub flags: u8,
}

impl Voxel {
    /// Empty/air voxel
    pub const EMPTY: Voxel = Voxel {
        color: 0,
        material_id: 0,
        flags: 0,
    };

    /// Create voxel from RGB888 values
    pub fn new(r: u8, g: u8, b: u8, material_id: u8) -> Self {
        Self {
            color: rgb_to_565(r, g, b),
            material_id,
            flags: 0,
        }
    }
}

impl Payload for Voxel {}
