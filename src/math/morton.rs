//! Morton encoding (Z-order curve) for octree descent

use crate::core::error::Error;
use crate::core::types::Result;

/// Deepest supported tree: 21 bits per axis fill 63 bits of a u64 code
pub const MAX_DEPTH: u8 = 21;

/// Spread bits of a 21-bit integer into every third bit of a 64-bit integer
fn spread_bits(x: u32) -> u64 {
    let mut x = x as u64 & 0x1fffff; // 21 bits max
    x = (x | (x << 32)) & 0x1f00000000ffff;
    x = (x | (x << 16)) & 0x1f0000ff0000ff;
    x = (x | (x << 8)) & 0x100f00f00f00f00f;
    x = (x | (x << 4)) & 0x10c30c30c30c30c3;
    x = (x | (x << 2)) & 0x1249249249249249;
    x
}

/// Compact every third bit of a 64-bit integer into a 21-bit integer
fn compact_bits(x: u64) -> u32 {
    let mut x = x & 0x1249249249249249;
    x = (x | (x >> 2)) & 0x10c30c30c30c30c3;
    x = (x | (x >> 4)) & 0x100f00f00f00f00f;
    x = (x | (x >> 8)) & 0x1f0000ff0000ff;
    x = (x | (x >> 16)) & 0x1f00000000ffff;
    x = (x | (x >> 32)) & 0x1fffff;
    x as u32
}

/// Encode 3D coordinates into Morton code (Z-order curve).
/// Inputs are masked to 21 bits; use [`MortonCodec`] for range-checked encoding.
pub fn encode_morton_3d(x: u32, y: u32, z: u32) -> u64 {
    spread_bits(x) | (spread_bits(y) << 1) | (spread_bits(z) << 2)
}

/// Decode Morton code back to 3D coordinates
pub fn decode_morton_3d(code: u64) -> (u32, u32, u32) {
    (
        compact_bits(code),
        compact_bits(code >> 1),
        compact_bits(code >> 2),
    )
}

/// Range-checked Morton codec for a cube of `2^depth` voxels per axis.
///
/// Each octree level consumes one 3-bit triple of the code, most significant
/// triple first. Within a triple bit 0 selects +x, bit 1 +y and bit 2 +z, which
/// is also the octant numbering used by DAG nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MortonCodec {
    depth: u8,
}

impl MortonCodec {
    /// Create a codec for the given depth (1..=21)
    pub fn new(depth: u8) -> Result<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(Error::InvalidDepth(depth));
        }
        Ok(Self { depth })
    }

    /// Tree depth D
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Voxels per axis (2^D)
    pub fn extent(&self) -> u32 {
        1 << self.depth
    }

    /// True if every component lies in `[0, 2^D)`
    pub fn in_range(&self, x: u32, y: u32, z: u32) -> bool {
        let extent = self.extent();
        x < extent && y < extent && z < extent
    }

    /// Encode a coordinate, rejecting anything outside the cube.
    pub fn encode(&self, x: u32, y: u32, z: u32) -> Result<u64> {
        if !self.in_range(x, y, z) {
            return Err(self.out_of_range(x as u64, y as u64, z as u64));
        }
        Ok(encode_morton_3d(x, y, z))
    }

    /// Decode a code, rejecting codes wider than 3*D bits.
    pub fn decode(&self, code: u64) -> Result<(u32, u32, u32)> {
        let bits = 3 * self.depth as u32;
        if code >> bits != 0 {
            let (x, y, z) = decode_morton_3d(code);
            // Bit 63 is the 22nd x bit, which the 21-bit compaction drops
            let x = x as u64 | ((code >> 63) << 21);
            return Err(self.out_of_range(x, y as u64, z as u64));
        }
        Ok(decode_morton_3d(code))
    }

    /// Octant selector (0..8) for descending from `level` to `level + 1`.
    /// Level 0 is the root.
    pub fn child_octant(&self, code: u64, level: u8) -> u8 {
        debug_assert!(level < self.depth, "level {} beyond depth {}", level, self.depth);
        let shift = 3 * (self.depth - 1 - level) as u32;
        ((code >> shift) & 7) as u8
    }

    fn out_of_range(&self, x: u64, y: u64, z: u64) -> Error {
        Error::OutOfRange {
            x,
            y,
            z,
            extent: self.extent() as u64,
        }
    }
}
