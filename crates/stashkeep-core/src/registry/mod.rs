//! Persistent registry of labeled containers.
//!
//! This module provides:
//! - The persisted record types and world partitioning
//! - Atomic JSON file operations
//! - A debounced writer
//! - [`RegistryStore`], the sole mutator of records

mod atomic;
mod flush;
mod store;
mod types;

pub use atomic::{read_json, write_json};
pub use flush::PersistStats;
pub use store::RegistryStore;
pub use types::{
    normalize_label, ContainerKind, ContainerRecord, Coord, RecordDraft, RecordSelector,
    RootRegistry, WorldKey, WorldRecords,
};
