//! Leaf payload contract

use std::fmt::Debug;
use std::hash::Hash;

use bytemuck::Pod;

/// Value stored in DAG leaves.
///
/// Any fixed-size comparable plain-old-data type works. `Default::default()`
/// is the empty payload: octants holding it are left out of their parent's
/// child mask.
pub trait Payload: Pod + Eq + Hash + Default + Debug + Send + Sync + 'static {
    /// Check if this is the empty payload
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Payload for u8 {}
impl Payload for u16 {}
impl Payload for u32 {}
impl Payload for u64 {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        assert!(Payload::is_empty(&0u8));
        assert!(!Payload::is_empty(&3u16));
    }
}
