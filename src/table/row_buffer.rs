use crate::table::value::{
    Timestamp, UnversionedRow, UnversionedValue, VersionedRow, VersionedValue,
};
use std::cell::{Cell, RefCell};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowBufferStatistics {
    pub rows_allocated: usize,
    pub values_allocated: usize,
    pub rows_recycled: usize,
}

/// Pool that hands out row storage to mergers and readers.
///
/// Rows handed back through `release_*` keep their capacity and are reused by
/// later allocations. Not thread-safe; one buffer serves one merge pass.
#[derive(Debug, Default)]
pub struct RowBuffer {
    unversioned: RefCell<Vec<Vec<UnversionedValue>>>,
    versioned: RefCell<Vec<Vec<VersionedValue>>>,
    timestamps: RefCell<Vec<Vec<Timestamp>>>,
    rows_allocated: Cell<usize>,
    values_allocated: Cell<usize>,
    rows_recycled: Cell<usize>,
}

impl RowBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, values: usize) {
        self.rows_allocated.set(self.rows_allocated.get() + 1);
        self.values_allocated
            .set(self.values_allocated.get() + values);
    }

    fn reuse<T>(free: &RefCell<Vec<Vec<T>>>, capacity: usize) -> Vec<T> {
        match free.borrow_mut().pop() {
            Some(mut storage) => {
                storage.clear();
                storage.reserve(capacity);
                storage
            }
            None => Vec::with_capacity(capacity),
        }
    }

    pub fn allocate_unversioned(&self, value_count: usize) -> UnversionedRow {
        self.record(value_count);
        UnversionedRow {
            values: Self::reuse(&self.unversioned, value_count),
        }
    }

    pub fn allocate_versioned(
        &self,
        key_count: usize,
        value_count: usize,
        write_count: usize,
        delete_count: usize,
    ) -> VersionedRow {
        self.record(key_count + value_count);
        VersionedRow {
            keys: Vec::with_capacity(key_count),
            values: Self::reuse(&self.versioned, value_count),
            write_timestamps: Self::reuse(&self.timestamps, write_count),
            delete_timestamps: Self::reuse(&self.timestamps, delete_count),
        }
    }

    pub fn release_unversioned(&self, row: UnversionedRow) {
        self.rows_recycled.set(self.rows_recycled.get() + 1);
        self.unversioned.borrow_mut().push(row.values);
    }

    pub fn release_versioned(&self, row: VersionedRow) {
        self.rows_recycled.set(self.rows_recycled.get() + 1);
        self.versioned.borrow_mut().push(row.values);
        let mut timestamps = self.timestamps.borrow_mut();
        timestamps.push(row.write_timestamps);
        timestamps.push(row.delete_timestamps);
    }

    pub fn statistics(&self) -> RowBufferStatistics {
        RowBufferStatistics {
            rows_allocated: self.rows_allocated.get(),
            values_allocated: self.values_allocated.get(),
            rows_recycled: self.rows_recycled.get(),
        }
    }

    /// Drops all pooled storage and resets counters.
    pub fn clear(&self) {
        self.unversioned.borrow_mut().clear();
        self.versioned.borrow_mut().clear();
        self.timestamps.borrow_mut().clear();
        self.rows_allocated.set(0);
        self.values_allocated.set(0);
        self.rows_recycled.set(0);
    }
}
