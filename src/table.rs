//! Row model and the row mergers that fold overlapping row versions.

pub mod retention;
pub mod row_buffer;
pub mod row_merger;
pub mod value;
pub mod wire;

pub use retention::{RetentionConfig, RetentionConfigError};
pub use row_buffer::{RowBuffer, RowBufferStatistics};
pub use row_merger::{ColumnFilter, UnversionedRowMerger, VersionedRowMerger};
pub use value::{
    ColumnId, OwningKey, Timestamp, UnversionedRow, UnversionedValue, Value, VersionedRow,
    VersionedValue, MAX_TIMESTAMP, MIN_TIMESTAMP, NULL_TIMESTAMP,
};
pub use wire::{read_unversioned_rowset, write_unversioned_rowset};
