use crate::table::retention::{RetentionConfig, RetentionConfigError};
use crate::table::row_buffer::RowBuffer;
use crate::table::value::{
    ColumnId, Timestamp, UnversionedRow, UnversionedValue, Value, VersionedRow, VersionedValue,
    NULL_TIMESTAMP,
};

/// Subset of schema columns a reader asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ColumnFilter {
    #[default]
    All,
    Columns(Vec<ColumnId>),
}

impl ColumnFilter {
    pub fn contains(&self, id: ColumnId) -> bool {
        match self {
            ColumnFilter::All => true,
            ColumnFilter::Columns(ids) => ids.contains(&id),
        }
    }
}

/// Folds partial versioned rows for one key into a single latest-value row.
///
/// Output columns are all key columns followed by the filtered value columns,
/// in filter order. Every value column keeps the write with the greatest
/// timestamp; values written before the latest delete read as `Null`.
pub struct UnversionedRowMerger<'a> {
    buffer: &'a RowBuffer,
    key_column_count: usize,
    column_ids: Vec<ColumnId>,
    column_id_to_index: Vec<Option<usize>>,
    merged_values: Vec<Value>,
    merged_timestamps: Vec<Timestamp>,
    latest_write: Timestamp,
    latest_delete: Timestamp,
    started: bool,
}

impl<'a> UnversionedRowMerger<'a> {
    pub fn new(
        buffer: &'a RowBuffer,
        schema_column_count: usize,
        key_column_count: usize,
        column_filter: &ColumnFilter,
    ) -> Self {
        assert!(
            key_column_count <= schema_column_count,
            "key column count {key_column_count} exceeds schema column count {schema_column_count}"
        );
        let mut column_ids: Vec<ColumnId> = (0..key_column_count as ColumnId).collect();
        match column_filter {
            ColumnFilter::All => {
                column_ids.extend(key_column_count as ColumnId..schema_column_count as ColumnId)
            }
            ColumnFilter::Columns(ids) => {
                for &id in ids {
                    assert!(
                        (id as usize) < schema_column_count,
                        "column filter references unknown column {id}"
                    );
                    if !column_ids.contains(&id) {
                        column_ids.push(id);
                    }
                }
            }
        }

        let mut column_id_to_index = vec![None; schema_column_count];
        for (index, &id) in column_ids.iter().enumerate() {
            column_id_to_index[id as usize] = Some(index);
        }

        let width = column_ids.len();
        Self {
            buffer,
            key_column_count,
            column_ids,
            column_id_to_index,
            merged_values: vec![Value::Null; width],
            merged_timestamps: vec![NULL_TIMESTAMP; width],
            latest_write: NULL_TIMESTAMP,
            latest_delete: NULL_TIMESTAMP,
            started: false,
        }
    }

    pub fn add_partial_row(&mut self, row: &VersionedRow) {
        if !self.started {
            for (slot, key) in self.merged_values[..self.key_column_count]
                .iter_mut()
                .zip(&row.keys)
            {
                *slot = key.clone();
            }
            self.started = true;
        } else {
            debug_assert_eq!(
                &self.merged_values[..self.key_column_count],
                &row.keys[..self.key_column_count.min(row.keys.len())]
            );
        }

        if let Some(&delete) = row.delete_timestamps.iter().max() {
            self.latest_delete = self.latest_delete.max(delete);
        }
        if let Some(&write) = row.write_timestamps.iter().max() {
            self.latest_write = self.latest_write.max(write);
        }

        for value in &row.values {
            if (value.id as usize) < self.key_column_count {
                continue;
            }
            let Some(index) = self
                .column_id_to_index
                .get(value.id as usize)
                .copied()
                .flatten()
            else {
                continue;
            };
            self.latest_write = self.latest_write.max(value.timestamp);
            if value.timestamp > self.merged_timestamps[index] {
                self.merged_values[index] = value.value.clone();
                self.merged_timestamps[index] = value.timestamp;
            }
        }
    }

    /// Emits the merged row and resets for the next key. `None` means the key
    /// has no visible row: nothing was added, nothing was written, or the latest
    /// delete is newer than the latest write.
    pub fn build_merged_row(&mut self) -> Option<UnversionedRow> {
        if !self.started {
            return None;
        }
        if self.latest_write == NULL_TIMESTAMP || self.latest_delete > self.latest_write {
            self.reset();
            return None;
        }

        let mut row = self.buffer.allocate_unversioned(self.column_ids.len());
        for (index, &id) in self.column_ids.iter().enumerate() {
            let value = if index < self.key_column_count {
                std::mem::replace(&mut self.merged_values[index], Value::Null)
            } else if self.merged_timestamps[index] == NULL_TIMESTAMP
                || self.merged_timestamps[index] < self.latest_delete
            {
                Value::Null
            } else {
                std::mem::replace(&mut self.merged_values[index], Value::Null)
            };
            row.values.push(UnversionedValue::new(id, value));
        }
        self.reset();
        Some(row)
    }

    pub fn reset(&mut self) {
        self.merged_values.fill(Value::Null);
        self.merged_timestamps.fill(NULL_TIMESTAMP);
        self.latest_write = NULL_TIMESTAMP;
        self.latest_delete = NULL_TIMESTAMP;
        self.started = false;
    }
}

/// Folds partial versioned rows for one key into a single versioned row,
/// applying deletes and the retention policy.
///
/// Per column, with versions newest first:
/// * versions older than the latest delete are purged unless younger than
///   `min_data_ttl`; a write at the delete timestamp survives, as it does in
///   [`UnversionedRowMerger`];
/// * of the rest, the newest is always kept, and version `i` is kept when it is
///   within `min_data_versions` or `min_data_ttl`, or within both
///   `max_data_versions` and `max_data_ttl`.
///
/// Delete timestamps survive when they are at or above `major_timestamp` or
/// still shadow a kept version.
pub struct VersionedRowMerger<'a> {
    buffer: &'a RowBuffer,
    key_column_count: usize,
    config: RetentionConfig,
    current_timestamp: Timestamp,
    major_timestamp: Timestamp,
    started: bool,
    keys: Vec<Value>,
    partial_values: Vec<VersionedValue>,
    delete_timestamps: Vec<Timestamp>,
    merged_values: Vec<VersionedValue>,
}

impl<'a> VersionedRowMerger<'a> {
    pub fn new(
        buffer: &'a RowBuffer,
        key_column_count: usize,
        config: RetentionConfig,
        current_timestamp: Timestamp,
        major_timestamp: Timestamp,
    ) -> Result<Self, RetentionConfigError> {
        config.validate()?;
        Ok(Self {
            buffer,
            key_column_count,
            config,
            current_timestamp,
            major_timestamp,
            started: false,
            keys: Vec::with_capacity(key_column_count),
            partial_values: Vec::new(),
            delete_timestamps: Vec::new(),
            merged_values: Vec::new(),
        })
    }

    pub fn add_partial_row(&mut self, row: &VersionedRow) {
        if !self.started {
            self.keys.clear();
            self.keys.extend(
                row.keys
                    .iter()
                    .take(self.key_column_count)
                    .cloned(),
            );
            self.started = true;
        } else {
            debug_assert_eq!(
                self.keys.as_slice(),
                &row.keys[..self.key_column_count.min(row.keys.len())]
            );
        }
        self.partial_values.extend(row.values.iter().cloned());
        self.delete_timestamps
            .extend_from_slice(&row.delete_timestamps);
    }

    pub fn build_merged_row(&mut self) -> Option<VersionedRow> {
        if !self.started {
            return None;
        }

        self.delete_timestamps.sort_unstable_by(|a, b| b.cmp(a));
        self.delete_timestamps.dedup();
        let latest_delete = self.delete_timestamps.first().copied();

        self.partial_values
            .sort_by(|a, b| a.id.cmp(&b.id).then(b.timestamp.cmp(&a.timestamp)));
        self.partial_values
            .dedup_by(|next, prev| next.id == prev.id && next.timestamp == prev.timestamp);

        self.merged_values.clear();
        let mut start = 0;
        while start < self.partial_values.len() {
            let id = self.partial_values[start].id;
            let end = self.partial_values[start..]
                .iter()
                .position(|value| value.id != id)
                .map_or(self.partial_values.len(), |offset| start + offset);
            self.retain_column(start, end, latest_delete);
            start = end;
        }

        let merged_values = &self.merged_values;
        let major_timestamp = self.major_timestamp;
        let kept_deletes: Vec<Timestamp> = self
            .delete_timestamps
            .iter()
            .copied()
            .filter(|&delete| {
                delete >= major_timestamp
                    || merged_values.iter().any(|value| value.timestamp < delete)
            })
            .collect();

        if self.merged_values.is_empty() && kept_deletes.is_empty() {
            self.reset();
            return None;
        }

        let mut write_timestamps: Vec<Timestamp> = self
            .merged_values
            .iter()
            .map(|value| value.timestamp)
            .collect();
        write_timestamps.sort_unstable_by(|a, b| b.cmp(a));
        write_timestamps.dedup();

        let mut row = self.buffer.allocate_versioned(
            self.keys.len(),
            self.merged_values.len(),
            write_timestamps.len(),
            kept_deletes.len(),
        );
        row.keys.extend(self.keys.drain(..));
        row.values.append(&mut self.merged_values);
        row.write_timestamps.extend(write_timestamps);
        row.delete_timestamps.extend(kept_deletes);
        self.reset();
        Some(row)
    }

    fn retain_column(&mut self, start: usize, end: usize, latest_delete: Option<Timestamp>) {
        let min_ttl = self.config.min_data_ttl_ticks();
        let max_ttl = self.config.max_data_ttl_ticks();
        let mut unshadowed = 0usize;
        for value in &self.partial_values[start..end] {
            let age = self.current_timestamp.saturating_sub(value.timestamp);
            let young = age < min_ttl;
            let shadowed = latest_delete.is_some_and(|delete| value.timestamp < delete);
            let keep = if shadowed {
                young
            } else {
                let index = unshadowed;
                unshadowed += 1;
                index == 0
                    || index < self.config.min_data_versions
                    || young
                    || (index < self.config.max_data_versions && age <= max_ttl)
            };
            if keep {
                self.merged_values.push(value.clone());
            }
        }
    }

    pub fn reset(&mut self) {
        self.keys.clear();
        self.partial_values.clear();
        self.delete_timestamps.clear();
        self.merged_values.clear();
        self.started = false;
    }
}
