//! Index serialization and disk I/O
//!
//! An index is stored as a node table in post-order: every node appears after
//! all of its children and shared nodes appear once. Interior records keep the
//! child mask plus one table reference per set bit, in increasing octant
//! order. The root is the last record.

use std::collections::HashMap;
use std::mem;
use std::path::Path;

use rkyv::{Archive, Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::morton::MortonCodec;
use crate::voxel::dag::{DagNode, DagStore, NodeArena, NodeId, Payload, SvdagIndex};

/// Bumped whenever the record layout changes
pub const FORMAT_VERSION: u32 = 1;

/// File extension used by the generator
pub const INDEX_EXTENSION: &str = "rkd";

/// One node of the table
#[derive(Archive, Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct NodeRecord {
    /// 0 for leaves
    pub child_mask: u8,
    /// Raw payload bytes (leaves only)
    pub payload: Vec<u8>,
    /// Table indices of the children, popcount-ordered
    pub children: Vec<u32>,
}

/// Serializable index
#[derive(Archive, Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct DagData {
    pub version: u32,
    pub depth: u8,
    /// `size_of::<P>()` of the payload the table was written with
    pub payload_size: u32,
    pub nodes: Vec<NodeRecord>,
}

impl DagData {
    /// Flatten the graph under an index root
    pub fn from_index<P: Payload>(index: &SvdagIndex<P>) -> Result<Self> {
        let arena = index.store().read();
        let nodes = post_order_records(&arena, index.root_id())?;
        Ok(Self {
            version: FORMAT_VERSION,
            depth: index.depth(),
            payload_size: mem::size_of::<P>() as u32,
            nodes,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn post_order_records<P: Payload>(arena: &NodeArena<P>, root: NodeId) -> Result<Vec<NodeRecord>> {
    let mut table: HashMap<NodeId, u32> = HashMap::new();
    let mut records = Vec::new();
    // (node, children already emitted)
    let mut stack = vec![(root, false)];

    while let Some((id, expanded)) = stack.pop() {
        if table.contains_key(&id) {
            continue;
        }
        let view = arena.get(id);
        let record = match view.payload() {
            Some(payload) => NodeRecord {
                child_mask: 0,
                payload: bytemuck::bytes_of(&payload).to_vec(),
                children: Vec::new(),
            },
            None if expanded => {
                let children = view
                    .children()
                    .iter()
                    .map(|child| {
                        table.get(child).copied().ok_or_else(|| {
                            Error::Corrupt(format!("child {} of {} not emitted", child, id))
                        })
                    })
                    .collect::<Result<Vec<u32>>>()?;
                NodeRecord {
                    child_mask: view.child_mask(),
                    payload: Vec::new(),
                    children,
                }
            }
            None => {
                stack.push((id, true));
                for &child in view.children().iter().rev() {
                    if !table.contains_key(&child) {
                        stack.push((child, false));
                    }
                }
                continue;
            }
        };
        table.insert(id, records.len() as u32);
        records.push(record);
    }

    Ok(records)
}

/// Serialize an index to bytes (uncompressed)
pub fn serialize_index<P: Payload>(index: &SvdagIndex<P>) -> Result<Vec<u8>> {
    let data = DagData::from_index(index)?;
    encode_dag_data(&data)
}

fn encode_dag_data(data: &DagData) -> Result<Vec<u8>> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(data)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(bytes.to_vec())
}

fn decode_dag_data(data: &[u8]) -> Result<DagData> {
    // Archived data must be aligned; decompressed buffers carry no guarantee
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(data.len());
    aligned.extend_from_slice(data);
    let archived = rkyv::access::<ArchivedDagData, rkyv::rancor::Error>(&aligned)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    rkyv::deserialize::<DagData, rkyv::rancor::Error>(archived)
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Deserialize an index from bytes (uncompressed) into `store`.
///
/// Every node is re-interned, so content already present in the store is
/// shared rather than duplicated.
pub fn deserialize_index<P: Payload>(store: &DagStore<P>, data: &[u8]) -> Result<SvdagIndex<P>> {
    let dag = decode_dag_data(data)?;
    index_from_dag_data(store, &dag)
}

/// Rebuild an index from a node table
pub fn index_from_dag_data<P: Payload>(store: &DagStore<P>, dag: &DagData) -> Result<SvdagIndex<P>> {
    if dag.version != FORMAT_VERSION {
        return Err(Error::Corrupt(format!("unsupported format version {}", dag.version)));
    }
    let codec = MortonCodec::new(dag.depth)?;
    if dag.payload_size as usize != mem::size_of::<P>() {
        return Err(Error::Corrupt(format!(
            "payload size {} does not match {}",
            dag.payload_size,
            mem::size_of::<P>()
        )));
    }
    if dag.nodes.is_empty() {
        return Err(Error::Corrupt("empty node table".into()));
    }

    let mut ids = Vec::with_capacity(dag.nodes.len());
    if let Err(e) = intern_records(store, &dag.nodes, codec.depth(), &mut ids) {
        let mut arena = store.write();
        for id in ids {
            arena.release(id);
        }
        return Err(e);
    }

    // Parents hold their children now; keep only the root reference
    let Some(root) = ids.pop() else {
        return Err(Error::Corrupt("empty node table".into()));
    };
    {
        let mut arena = store.write();
        for id in ids {
            arena.release(id);
        }
    }
    log::debug!(
        "Interned {} records as root {} ({} live nodes)",
        dag.nodes.len(),
        root,
        store.node_count()
    );

    Ok(SvdagIndex::from_owned_root(store, root, codec))
}

/// Push one owned id per record. On error, `ids` holds what was interned so far.
/// The arena is locked per record, so readers interleave with a large load.
fn intern_records<P: Payload>(
    store: &DagStore<P>,
    records: &[NodeRecord],
    depth: u8,
    ids: &mut Vec<NodeId>,
) -> Result<()> {
    // Height of each record's subtree, bounded by the index depth
    let mut heights: Vec<u8> = Vec::with_capacity(records.len());

    for (i, record) in records.iter().enumerate() {
        let mut arena = store.write();
        let (id, height) = if record.child_mask == 0 {
            if !record.children.is_empty() {
                return Err(Error::Corrupt(format!("leaf record {} has children", i)));
            }
            let payload = bytemuck::try_pod_read_unaligned::<P>(&record.payload)
                .map_err(|e| Error::Corrupt(format!("leaf record {}: {:?}", i, e)))?;
            (arena.allocate(DagNode::Leaf(payload))?, 0)
        } else {
            if record.children.len() != record.child_mask.count_ones() as usize {
                return Err(Error::Corrupt(format!(
                    "record {}: mask {:#010b} with {} children",
                    i,
                    record.child_mask,
                    record.children.len()
                )));
            }
            let mut children = [None; 8];
            let mut height = 0u8;
            let mut packed = record.children.iter();
            for octant in 0..8u8 {
                if record.child_mask & (1 << octant) == 0 {
                    continue;
                }
                let Some(&child) = packed.next() else {
                    return Err(Error::Corrupt(format!("record {}: missing child", i)));
                };
                let child = child as usize;
                if child >= i {
                    return Err(Error::Corrupt(format!(
                        "record {} references record {} out of order",
                        i, child
                    )));
                }
                children[octant as usize] = arena.as_child(ids[child]);
                height = height.max(heights[child] + 1);
            }
            if height > depth {
                return Err(Error::Corrupt(format!(
                    "record {} is {} levels deep in a depth {} index",
                    i, height, depth
                )));
            }
            (arena.join(children)?, height)
        };
        ids.push(id);
        heights.push(height);
    }
    Ok(())
}

/// Serialize and compress an index using LZ4
pub fn compress_index<P: Payload>(index: &SvdagIndex<P>) -> Result<Vec<u8>> {
    let serialized = serialize_index(index)?;
    Ok(lz4_flex::compress_prepend_size(&serialized))
}

/// Decompress and deserialize an index into `store`
pub fn decompress_index<P: Payload>(store: &DagStore<P>, data: &[u8]) -> Result<SvdagIndex<P>> {
    let decompressed = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| Error::Corrupt(format!("LZ4 decompression failed: {}", e)))?;
    deserialize_index(store, &decompressed)
}

/// Save an index to disk (compressed)
pub async fn save_index<P: Payload>(path: &Path, index: &SvdagIndex<P>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let compressed = compress_index(index)?;
    let size = compressed.len();
    tokio::fs::write(path, compressed).await?;

    log::info!("Saved index to {} ({} bytes)", path.display(), size);
    Ok(())
}

/// Load an index from disk into `store`
pub async fn load_index<P: Payload>(path: &Path, store: &DagStore<P>) -> Result<SvdagIndex<P>> {
    let compressed = tokio::fs::read(path).await?;
    let index = decompress_index(store, &compressed)?;

    log::info!(
        "Loaded depth {} index from {} ({} bytes, {} live nodes)",
        index.depth(),
        path.display(),
        compressed.len(),
        store.node_count()
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::region::Region;
    use glam::UVec3;
    use tempfile::TempDir;

    fn sample_index(store: &DagStore<u16>) -> SvdagIndex<u16> {
        SvdagIndex::new(store, 5)
            .unwrap()
            .merge_region(Region::new(UVec3::ZERO, UVec3::new(31, 3, 31)).unwrap(), 7)
            .unwrap()
            .set(3, 9, 3, 300)
            .unwrap()
            .set(19, 9, 3, 300)
            .unwrap()
            .set(30, 30, 30, 1)
            .unwrap()
    }

    fn assert_same_content(a: &SvdagIndex<u16>, b: &SvdagIndex<u16>) {
        assert_eq!(a.depth(), b.depth());
        assert_eq!(a.solid_voxel_count(), b.solid_voxel_count());
        assert_eq!(a.reachable_nodes(), b.reachable_nodes());
        for (x, y, z) in [(0, 0, 0), (3, 9, 3), (19, 9, 3), (30, 30, 30), (5, 5, 5), (31, 3, 31)] {
            assert_eq!(a.get(x, y, z).unwrap(), b.get(x, y, z).unwrap());
        }
    }

    #[test]
    fn test_post_order_table() {
        let store = DagStore::new(1 << 12);
        let index = sample_index(&store);
        let data = DagData::from_index(&index).unwrap();

        // Shared nodes written once
        assert_eq!(data.node_count(), index.reachable_nodes());
        for (i, record) in data.nodes.iter().enumerate() {
            assert!(record.children.iter().all(|&child| (child as usize) < i));
            assert_eq!(record.children.len(), record.child_mask.count_ones() as usize);
        }
        assert_ne!(data.nodes.last().unwrap().child_mask, 0);
    }

    #[test]
    fn test_reload_into_same_store_shares_root() {
        let store = DagStore::new(1 << 12);
        let index = sample_index(&store);
        let before = store.node_count();

        let bytes = serialize_index(&index).unwrap();
        let loaded = deserialize_index(&store, &bytes).unwrap();
        assert!(loaded.same_root(&index));
        assert_eq!(store.node_count(), before);
    }

    #[test]
    fn test_reload_into_fresh_store() {
        let store = DagStore::new(1 << 12);
        let index = sample_index(&store);
        let compressed = compress_index(&index).unwrap();

        let fresh = DagStore::new(1 << 12);
        let loaded = decompress_index(&fresh, &compressed).unwrap();
        assert_same_content(&index, &loaded);
        assert_eq!(fresh.node_count(), index.reachable_nodes());
    }

    #[test]
    fn test_empty_index() {
        let store = DagStore::<u8>::new(16);
        let index = SvdagIndex::new(&store, 3).unwrap();
        let data = DagData::from_index(&index).unwrap();
        assert_eq!(data.node_count(), 1);

        let loaded = decompress_index(&store, &compress_index(&index).unwrap()).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.depth(), 3);
    }

    #[test]
    fn test_payload_size_mismatch() {
        let store = DagStore::<u16>::new(1 << 12);
        let bytes = serialize_index(&sample_index(&store)).unwrap();
        let other = DagStore::<u32>::new(1 << 12);
        assert!(matches!(deserialize_index(&other, &bytes), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_corrupt_tables_rejected() {
        let store = DagStore::<u8>::new(1 << 12);
        let leaf = NodeRecord {
            child_mask: 0,
            payload: vec![1],
            children: Vec::new(),
        };
        let data = |nodes: Vec<NodeRecord>| DagData {
            version: FORMAT_VERSION,
            depth: 2,
            payload_size: 1,
            nodes,
        };

        // Forward reference
        let forward = data(vec![NodeRecord {
            child_mask: 0b1,
            payload: Vec::new(),
            children: vec![0],
        }]);
        assert!(matches!(index_from_dag_data(&store, &forward), Err(Error::Corrupt(_))));

        // Mask and child count disagree
        let mismatched = data(vec![
            leaf.clone(),
            NodeRecord {
                child_mask: 0b11,
                payload: Vec::new(),
                children: vec![0],
            },
        ]);
        assert!(matches!(index_from_dag_data(&store, &mismatched), Err(Error::Corrupt(_))));

        // Deeper than the declared depth
        let nested = |child: u32| NodeRecord {
            child_mask: 0b1,
            payload: Vec::new(),
            children: vec![child],
        };
        let too_deep = data(vec![leaf.clone(), nested(0), nested(1), nested(2)]);
        assert!(matches!(index_from_dag_data(&store, &too_deep), Err(Error::Corrupt(_))));

        // Failed loads leave nothing behind
        assert_eq!(store.node_count(), 0);

        let ok = data(vec![leaf, nested(0), nested(1)]);
        let index = index_from_dag_data(&store, &ok).unwrap();
        assert_eq!(index.get(0, 0, 0).unwrap(), 1);
        assert_eq!(index.solid_voxel_count(), 1);
    }

    #[test]
    fn test_non_canonical_table_is_normalized() {
        let store = DagStore::<u8>::new(1 << 12);
        let leaf = NodeRecord {
            child_mask: 0,
            payload: vec![4],
            children: Vec::new(),
        };
        // Interior whose eight children are the same leaf
        let data = DagData {
            version: FORMAT_VERSION,
            depth: 1,
            payload_size: 1,
            nodes: vec![
                leaf,
                NodeRecord {
                    child_mask: 0xFF,
                    payload: Vec::new(),
                    children: vec![0; 8],
                },
            ],
        };
        let index = index_from_dag_data(&store, &data).unwrap();
        assert_eq!(index.reachable_nodes(), 1);
        assert_eq!(index.solid_voxel_count(), 8);
    }

    #[test]
    fn test_garbage_rejected() {
        let store = DagStore::<u8>::new(16);
        assert!(decompress_index(&store, &[1, 2, 3]).is_err());
        assert!(deserialize_index(&store, &[0u8; 7]).is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_index() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("volumes").join(format!("sample.{}", INDEX_EXTENSION));

        let store = DagStore::new(1 << 12);
        let index = sample_index(&store);
        save_index(&path, &index).await.unwrap();
        assert!(path.exists());

        let fresh = DagStore::new(1 << 12);
        let loaded = load_index(&path, &fresh).await.unwrap();
        assert_same_content(&index, &loaded);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let store = DagStore::<u8>::new(16);
        let result = load_index(&temp.path().join("missing.rkd"), &store).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
