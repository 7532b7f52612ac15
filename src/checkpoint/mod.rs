//! Checkpoint persistence: convention-named, lz4-compressed agent snapshots
//! written atomically.

mod metadata;
mod store;

pub use metadata::{CheckpointMetadata, CheckpointMetrics, FORMAT_VERSION};
pub use store::{
    checkpoint_file_name, Checkpoint, CheckpointStore, CheckpointStoreConfig, CHECKPOINT_EXTENSION,
};
