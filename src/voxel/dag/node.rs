//! DAG node format
//!
//! Interior nodes store an 8-bit child mask plus one child reference per set
//! bit, packed in increasing octant order. The child for octant `i` lives at
//! slot `popcount(mask & ((1 << i) - 1))`; there is no per-child index table.

use std::fmt;

/// Index of a node in the [`NodeArena`](super::NodeArena)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Raw arena slot index
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Number of children preceding `octant` in a packed child list
#[inline]
pub fn child_slot(child_mask: u8, octant: u8) -> usize {
    debug_assert!(octant < 8);
    (child_mask & ((1u8 << octant).wrapping_sub(1))).count_ones() as usize
}

/// Node content. Leaves are size-independent: a `Leaf(p)` at any level means
/// the whole cell holds `p`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DagNode<P> {
    Leaf(P),
    Interior {
        /// Bit i set <=> octant i is non-empty
        child_mask: u8,
        /// One reference per set bit, increasing octant order
        children: Box<[NodeId]>,
    },
}

impl<P> DagNode<P> {
    /// Pack an 8-way child array into an interior node.
    /// `None` entries are empty octants.
    pub fn interior(children: [Option<NodeId>; 8]) -> Self {
        let mut child_mask = 0u8;
        let mut packed = Vec::with_capacity(8);
        for (octant, child) in children.iter().enumerate() {
            if let Some(id) = child {
                child_mask |= 1 << octant;
                packed.push(*id);
            }
        }
        DagNode::Interior {
            child_mask,
            children: packed.into_boxed_slice(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, DagNode::Leaf(_))
    }

    /// Child mask (0 for leaves)
    pub fn child_mask(&self) -> u8 {
        match self {
            DagNode::Leaf(_) => 0,
            DagNode::Interior { child_mask, .. } => *child_mask,
        }
    }

    /// Packed child references (empty for leaves)
    pub fn children(&self) -> &[NodeId] {
        match self {
            DagNode::Leaf(_) => &[],
            DagNode::Interior { children, .. } => children,
        }
    }

    /// Child reference for an octant, `None` when the octant is empty
    pub fn child(&self, octant: u8) -> Option<NodeId> {
        match self {
            DagNode::Leaf(_) => None,
            DagNode::Interior { child_mask, children } => {
                if child_mask & (1 << octant) == 0 {
                    None
                } else {
                    Some(children[child_slot(*child_mask, octant)])
                }
            }
        }
    }

    /// Child mask and child count agree
    pub(crate) fn is_well_formed(&self) -> bool {
        match self {
            DagNode::Leaf(_) => true,
            DagNode::Interior { child_mask, children } => {
                *child_mask != 0 && child_mask.count_ones() as usize == children.len()
            }
        }
    }
}

/// Read-only view of a live arena node
#[derive(Clone, Copy, Debug)]
pub struct NodeView<'a, P> {
    pub(crate) id: NodeId,
    pub(crate) node: &'a DagNode<P>,
    pub(crate) ref_count: u32,
    pub(crate) hash: u64,
}

impl<'a, P: Copy> NodeView<'a, P> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node(&self) -> &'a DagNode<P> {
        self.node
    }

    pub fn is_leaf(&self) -> bool {
        self.node.is_leaf()
    }

    /// Leaf payload, `None` for interior nodes
    pub fn payload(&self) -> Option<P> {
        match self.node {
            DagNode::Leaf(p) => Some(*p),
            DagNode::Interior { .. } => None,
        }
    }

    pub fn child_mask(&self) -> u8 {
        self.node.child_mask()
    }

    pub fn children(&self) -> &'a [NodeId] {
        self.node.children()
    }

    pub fn child(&self, octant: u8) -> Option<NodeId> {
        self.node.child(octant)
    }

    /// Number of live references (parents and roots)
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Referenced from more than one place
    pub fn is_shared(&self) -> bool {
        self.ref_count > 1
    }

    /// Structural hash of this node's content
    pub fn hash(&self) -> u64 {
        self.hash
    }
}
