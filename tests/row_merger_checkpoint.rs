use hydra_tablet::table::{
    ColumnFilter, RetentionConfig, RowBuffer, UnversionedRowMerger, Value, VersionedRow,
    VersionedRowMerger,
};

const NOW: u64 = 10_000_000;

fn key(k: i64) -> Vec<Value> {
    vec![Value::Int64(k)]
}

/// Three stores each holding a slice of the history of key 1.
fn store_rows() -> Vec<VersionedRow> {
    vec![
        VersionedRow::new(key(1))
            .with_value(1, Value::Int64(100), 100)
            .with_value(1, Value::Int64(200), 200)
            .with_delete(50),
        VersionedRow::new(key(1))
            .with_value(1, Value::Int64(300), 300)
            .with_value(2, Value::string("x"), 300),
        VersionedRow::new(key(1))
            .with_value(1, Value::Int64(400), 400)
            .with_value(1, Value::Int64(500), 500),
    ]
}

#[test]
fn compaction_keeps_newest_versions_and_drops_old_deletes() {
    let buffer = RowBuffer::new();
    let mut merger =
        VersionedRowMerger::new(&buffer, 1, RetentionConfig::keep_versions(2), NOW, 1_000)
            .unwrap();
    for row in store_rows() {
        merger.add_partial_row(&row);
    }
    let merged = merger.build_merged_row().unwrap();

    let column_one: Vec<u64> = merged.column_values(1).map(|v| v.timestamp).collect();
    assert_eq!(column_one, vec![500, 400]);
    assert_eq!(merged.column_values(2).count(), 1);
    assert!(merged.delete_timestamps.is_empty());
    assert_eq!(merged.write_timestamps, vec![500, 400, 300]);
    assert_eq!(merged.keys, key(1));
}

#[test]
fn deletes_above_major_timestamp_are_preserved() {
    let buffer = RowBuffer::new();
    let mut merger =
        VersionedRowMerger::new(&buffer, 1, RetentionConfig::keep_versions(2), NOW, 10).unwrap();
    for row in store_rows() {
        merger.add_partial_row(&row);
    }
    let merged = merger.build_merged_row().unwrap();
    assert_eq!(merged.delete_timestamps, vec![50]);
}

#[test]
fn lookup_reads_latest_value_of_compacted_row() {
    let buffer = RowBuffer::new();
    let mut compactor =
        VersionedRowMerger::new(&buffer, 1, RetentionConfig::keep_versions(2), NOW, 1_000)
            .unwrap();
    for row in store_rows() {
        compactor.add_partial_row(&row);
    }
    let compacted = compactor.build_merged_row().unwrap();

    let mut reader = UnversionedRowMerger::new(&buffer, 3, 1, &ColumnFilter::All);
    reader.add_partial_row(&compacted);
    reader.add_partial_row(&VersionedRow::new(key(1)).with_value(2, Value::string("y"), 600));
    let row = reader.build_merged_row().unwrap();
    assert_eq!(row.value(0), Some(&Value::Int64(1)));
    assert_eq!(row.value(1), Some(&Value::Int64(500)));
    assert_eq!(row.value(2), Some(&Value::string("y")));

    buffer.release_unversioned(row);
    buffer.release_versioned(compacted);
    assert!(buffer.statistics().rows_recycled >= 1);
}

#[test]
fn fully_deleted_key_disappears_after_major_compaction() {
    let buffer = RowBuffer::new();
    let mut merger =
        VersionedRowMerger::new(&buffer, 1, RetentionConfig::default(), NOW, NOW).unwrap();
    merger.add_partial_row(&VersionedRow::new(key(4)).with_value(1, Value::Int64(1), 10));
    merger.add_partial_row(&VersionedRow::new(key(4)).with_delete(20));
    assert!(merger.build_merged_row().is_none());
}
