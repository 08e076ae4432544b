//! Tablet partitioning: stores, partitions and the tablet that owns them.

pub mod config;
pub mod core;
pub mod partition;
pub mod store;

pub use self::config::{TabletConfig, TabletConfigError};
pub use self::core::{PartitionLayoutError, Tablet, TabletId, TabletSnapshot};
pub use self::partition::{
    AsyncSaveFn, Partition, PartitionId, PartitionSnapshot, PartitionSnapshotRef, PartitionState,
    SampleKeyList, EDEN_INDEX,
};
pub use self::store::{
    store_overlaps, SortedStore, SortedStoreRef, StoreDescriptor, StoreId, StoreIndex,
    StoreResolver,
};
