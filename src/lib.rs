//! Replicated mutation log primitives and the tablet partition and row merge
//! core that sits on top of them.

pub mod hydra;
pub mod serialize;
pub mod table;
pub mod tablet;
pub mod util;

pub use hydra::{
    create_mutation, ChangelogStore, CommitError, ElectionPriority, HydraManager,
    LocalHydraManager, Mutation, MutationContext, MutationRequest, MutationResponse,
    ReachableState, Version,
};
pub use serialize::{LoadContext, Persistent, SaveContext, SerializeError};
pub use table::{
    ColumnFilter, OwningKey, RetentionConfig, RowBuffer, UnversionedRowMerger, Value,
    VersionedRow, VersionedRowMerger,
};
pub use tablet::{Partition, PartitionState, StoreId, Tablet, TabletConfig, TabletId};
pub use util::HydraTabletError;
