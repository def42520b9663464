//! Index persistence

pub mod disk_io;

pub use disk_io::{
    DagData, NodeRecord, FORMAT_VERSION, INDEX_EXTENSION,
    compress_index, decompress_index,
    serialize_index, deserialize_index, index_from_dag_data,
    save_index, load_index,
};
