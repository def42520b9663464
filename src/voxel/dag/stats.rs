//! Read-only arena diagnostics for telemetry displays

use std::fmt;

/// Arena statistics, accurate at the time they were taken
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DagStats {
    /// Live nodes
    pub node_count: usize,
    pub leaf_count: usize,
    pub interior_count: usize,
    /// Live nodes referenced from more than one parent or root
    pub shared_nodes: usize,
    /// `shared_nodes / node_count`, 0 for an empty arena
    pub shared_node_ratio: f32,
    /// Estimated heap footprint of the arena in bytes
    pub memory_bytes: usize,
    /// Allocated slots, live or vacant
    pub slot_count: usize,
    pub free_slots: usize,
    /// Nodes ever stored
    pub allocations: u64,
    /// Allocations answered by an existing identical node
    pub dedup_hits: u64,
}

impl DagStats {
    /// Fraction of allocation requests served by deduplication
    pub fn dedup_ratio(&self) -> f32 {
        let requests = self.allocations + self.dedup_hits;
        if requests == 0 {
            0.0
        } else {
            self.dedup_hits as f32 / requests as f32
        }
    }
}

impl fmt::Display for DagStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes ({} leaves, {} interior), {:.1}% shared, {:.1} KiB",
            self.node_count,
            self.leaf_count,
            self.interior_count,
            self.shared_node_ratio * 100.0,
            self.memory_bytes as f32 / 1024.0,
        )
    }
}
