//! Node arena - content-addressed, reference-counted node storage
//!
//! Every node lives in exactly one slot. Allocation first looks the content up
//! by structural hash, so identical subtrees always resolve to the same slot.
//! Reference counts cover both parent links and root handles; a slot is freed
//! as soon as its count drops to zero.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::config::DagConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use super::node::{DagNode, NodeId, NodeView};
use super::payload::Payload;
use super::stats::DagStats;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

struct Slot<P> {
    /// `None` while the slot is on the free list
    node: Option<DagNode<P>>,
    refs: u32,
    hash: u64,
}

/// Contiguous storage for DAG nodes
pub struct NodeArena<P: Payload> {
    slots: Vec<Slot<P>>,
    /// Indices of vacant slots, reused LIFO
    free: Vec<u32>,
    /// Structural hash -> live nodes with that hash
    lookup: HashMap<u64, Vec<NodeId>>,
    live: usize,
    max_nodes: usize,
    allocations: u64,
    dedup_hits: u64,
}

impl<P: Payload> NodeArena<P> {
    /// Create an empty arena holding at most `max_nodes` live nodes
    pub fn new(max_nodes: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            lookup: HashMap::new(),
            live: 0,
            max_nodes,
            allocations: 0,
            dedup_hits: 0,
        }
    }

    pub fn from_config(config: &DagConfig) -> Self {
        Self::new(config.max_nodes)
    }

    /// Return a node with the given content, reusing an identical live node
    /// when one exists. The caller receives one reference.
    ///
    /// Newly stored interior nodes take a reference on each child; the caller
    /// keeps whatever references it already held.
    pub fn allocate(&mut self, node: DagNode<P>) -> Result<NodeId> {
        debug_assert!(node.is_well_formed(), "malformed node {:?}", node);
        let hash = Self::hash_node(&node);

        if let Some(bucket) = self.lookup.get(&hash) {
            let existing = bucket
                .iter()
                .copied()
                .find(|id| self.slots[id.0 as usize].node.as_ref() == Some(&node));
            if let Some(id) = existing {
                self.slots[id.0 as usize].refs += 1;
                self.dedup_hits += 1;
                return Ok(id);
            }
        }

        if self.live >= self.max_nodes {
            log::warn!("Node arena full: {} live nodes", self.live);
            return Err(Error::ArenaExhausted {
                capacity: self.max_nodes,
            });
        }

        for &child in node.children() {
            let slot = &mut self.slots[child.0 as usize];
            debug_assert!(slot.node.is_some(), "child {} is not live", child);
            slot.refs += 1;
        }

        let slot = Slot {
            node: Some(node),
            refs: 1,
            hash,
        };
        let id = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = slot;
                NodeId(index)
            }
            None => {
                self.slots.push(slot);
                NodeId(self.slots.len() as u32 - 1)
            }
        };

        self.lookup.entry(hash).or_default().push(id);
        self.live += 1;
        self.allocations += 1;
        Ok(id)
    }

    /// Add a reference to a live node
    pub fn retain(&mut self, id: NodeId) {
        let slot = &mut self.slots[id.0 as usize];
        debug_assert!(slot.node.is_some(), "retain of dead node {}", id);
        slot.refs += 1;
    }

    /// Drop a reference. Nodes reaching zero are freed and their children
    /// released in turn; nodes still referenced elsewhere are untouched.
    pub fn release(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let slot = &mut self.slots[id.0 as usize];
            if slot.refs == 0 {
                debug_assert!(false, "release of dead node {}", id);
                continue;
            }
            slot.refs -= 1;
            if slot.refs > 0 {
                continue;
            }

            let Some(node) = slot.node.take() else {
                continue;
            };
            let hash = slot.hash;
            if let Some(bucket) = self.lookup.get_mut(&hash) {
                bucket.retain(|&other| other != id);
                if bucket.is_empty() {
                    self.lookup.remove(&hash);
                }
            }
            self.free.push(id.0);
            self.live -= 1;

            if let DagNode::Interior { children, .. } = node {
                pending.extend(children.iter().copied());
            }
        }
    }

    /// Read-only view of a live node.
    ///
    /// Panics if `id` does not name a live node; ids are only handed out by
    /// this arena and stay valid while referenced.
    pub fn get(&self, id: NodeId) -> NodeView<'_, P> {
        self.try_get(id)
            .unwrap_or_else(|| panic!("node {} is not live", id))
    }

    /// Read-only view, `None` for free or unknown slots
    pub fn try_get(&self, id: NodeId) -> Option<NodeView<'_, P>> {
        let slot = self.slots.get(id.0 as usize)?;
        slot.node.as_ref().map(|node| NodeView {
            id,
            node,
            ref_count: slot.refs,
            hash: slot.hash,
        })
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.live
    }

    /// Configured node ceiling
    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// Trim vacant slots at the end of storage and shrink internal tables.
    /// Live ids never move. Returns the number of slots reclaimed.
    pub fn compact(&mut self) -> usize {
        let before = self.slots.len();
        while matches!(self.slots.last(), Some(slot) if slot.node.is_none()) {
            self.slots.pop();
        }
        let len = self.slots.len() as u32;
        self.free.retain(|&index| index < len);

        self.slots.shrink_to_fit();
        self.free.shrink_to_fit();
        self.lookup.shrink_to_fit();

        let reclaimed = before - self.slots.len();
        log::info!(
            "Arena compaction: {} slots -> {} slots ({} live, {} free)",
            before,
            self.slots.len(),
            self.live,
            self.free.len(),
        );
        reclaimed
    }

    /// Snapshot of arena statistics
    pub fn stats(&self) -> DagStats {
        let mut leaf_count = 0;
        let mut shared_nodes = 0;
        let mut child_refs = 0;
        for slot in &self.slots {
            let Some(node) = &slot.node else { continue };
            if node.is_leaf() {
                leaf_count += 1;
            }
            if slot.refs > 1 {
                shared_nodes += 1;
            }
            child_refs += node.children().len();
        }

        let bucket_bytes: usize = self
            .lookup
            .values()
            .map(|bucket| bucket.capacity() * std::mem::size_of::<NodeId>())
            .sum();
        let memory_bytes = self.slots.capacity() * std::mem::size_of::<Slot<P>>()
            + child_refs * std::mem::size_of::<NodeId>()
            + self.free.capacity() * std::mem::size_of::<u32>()
            + self.lookup.capacity()
                * (std::mem::size_of::<u64>() + std::mem::size_of::<Vec<NodeId>>())
            + bucket_bytes;

        DagStats {
            node_count: self.live,
            leaf_count,
            interior_count: self.live - leaf_count,
            shared_nodes,
            shared_node_ratio: if self.live == 0 {
                0.0
            } else {
                shared_nodes as f32 / self.live as f32
            },
            memory_bytes,
            slot_count: self.slots.len(),
            free_slots: self.free.len(),
            allocations: self.allocations,
            dedup_hits: self.dedup_hits,
        }
    }

    // --- Canonical construction ---

    /// Node for an 8-way child array, in canonical form: all-empty collapses
    /// to the empty leaf, eight identical leaves collapse to that leaf.
    pub(crate) fn join(&mut self, children: [Option<NodeId>; 8]) -> Result<NodeId> {
        match children[0] {
            None if children.iter().all(Option::is_none) => {
                self.allocate(DagNode::Leaf(P::default()))
            }
            Some(first)
                if self.get(first).is_leaf()
                    && children.iter().all(|&child| child == Some(first)) =>
            {
                self.retain(first);
                Ok(first)
            }
            _ => self.allocate(DagNode::interior(children)),
        }
    }

    /// 8-way child array of a cell. `None` input is an empty cell. Leaves
    /// split into eight copies of themselves. Returned ids are borrowed.
    pub(crate) fn split(&self, node: Option<NodeId>) -> [Option<NodeId>; 8] {
        let Some(id) = node else {
            return [None; 8];
        };
        let view = self.get(id);
        match view.payload() {
            Some(p) if p.is_empty() => [None; 8],
            Some(_) => [Some(id); 8],
            None => std::array::from_fn(|octant| view.child(octant as u8)),
        }
    }

    /// Child-slot form of a node: the empty leaf becomes `None`
    pub(crate) fn as_child(&self, id: NodeId) -> Option<NodeId> {
        match self.get(id).payload() {
            Some(p) if p.is_empty() => None,
            _ => Some(id),
        }
    }

    /// FNV-1a over the node content
    fn hash_node(node: &DagNode<P>) -> u64 {
        let mut hash = FNV_OFFSET;
        match node {
            DagNode::Leaf(payload) => {
                for &byte in bytemuck::bytes_of(payload) {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(FNV_PRIME);
                }
            }
            DagNode::Interior { child_mask, children } => {
                hash ^= 0x100 | *child_mask as u64;
                hash = hash.wrapping_mul(FNV_PRIME);
                for child in children.iter() {
                    hash ^= child.0 as u64;
                    hash = hash.wrapping_mul(FNV_PRIME);
                }
            }
        }
        hash
    }
}

/// Shared handle to one arena.
///
/// Readers take the shared lock and may run in parallel; each edit holds the
/// exclusive lock for its duration. Node content is never mutated in place,
/// so a reader's snapshot stays valid across edits made by others.
pub struct DagStore<P: Payload> {
    inner: Arc<RwLock<NodeArena<P>>>,
}

impl<P: Payload> Clone for DagStore<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Payload> DagStore<P> {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(NodeArena::new(max_nodes))),
        }
    }

    pub fn from_config(config: &DagConfig) -> Self {
        Self::new(config.max_nodes)
    }

    /// Shared access to the arena
    pub fn read(&self) -> RwLockReadGuard<'_, NodeArena<P>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to the arena
    pub fn write(&self) -> RwLockWriteGuard<'_, NodeArena<P>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if both handles refer to the same arena
    pub fn same_store(&self, other: &DagStore<P>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn stats(&self) -> DagStats {
        self.read().stats()
    }

    pub fn node_count(&self) -> usize {
        self.read().node_count()
    }

    pub fn shared_node_ratio(&self) -> f32 {
        self.read().stats().shared_node_ratio
    }

    pub fn memory_bytes(&self) -> usize {
        self.read().stats().memory_bytes
    }

    pub fn compact(&self) -> usize {
        self.write().compact()
    }
}
