use crate::hydra::mutation::MutationId;
use crate::hydra::version::Version;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SEGMENT_EXTENSION: &str = "log";

/// One committed mutation as persisted in a changelog segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangelogRecord {
    pub record_id: i32,
    /// Leader term the record was committed in.
    #[serde(default)]
    pub term: i32,
    pub mutation_type: String,
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_id: Option<MutationId>,
    pub timestamp_us: u64,
    pub random_seed: u64,
}

/// Segmented, append-only changelog. Each segment lives in its own
/// `<segment_id>.log` file of JSON lines; record ids restart at zero per segment.
#[derive(Debug)]
pub struct ChangelogStore {
    root: PathBuf,
    segment_id: i32,
    record_count: i32,
    total_record_count: i64,
    last_term: i32,
}

impl ChangelogStore {
    /// Opens (or creates) the changelog under `root`, positioning at the end of
    /// the newest segment found on disk.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ChangelogError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let segment_id = Self::list_segments(&root)?.last().copied().unwrap_or(0);
        let path = Self::segment_path(&root, segment_id);
        let records = Self::load_records(&path)?;
        for (expected, record) in records.iter().enumerate() {
            if record.record_id != expected as i32 {
                return Err(ChangelogError::NonSequentialAppend {
                    segment_id,
                    expected: expected as i32,
                    attempted: record.record_id,
                });
            }
        }
        let mut total_record_count = records.len() as i64;
        let mut last_term = records.last().map(|record| record.term);
        for earlier in Self::list_segments(&root)?
            .into_iter()
            .rev()
            .filter(|&id| id < segment_id)
        {
            let earlier_records = Self::load_records(&Self::segment_path(&root, earlier))?;
            total_record_count += earlier_records.len() as i64;
            if last_term.is_none() {
                last_term = earlier_records.last().map(|record| record.term);
            }
        }
        Ok(Self {
            root,
            segment_id,
            record_count: records.len() as i32,
            total_record_count,
            last_term: last_term.unwrap_or(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Version the next appended record will receive.
    pub fn next_version(&self) -> Version {
        Version::new(self.segment_id, self.record_count)
    }

    pub fn segment_id(&self) -> i32 {
        self.segment_id
    }

    pub fn record_count(&self) -> i32 {
        self.record_count
    }

    /// Records across every segment, i.e. the sequence number of the next record.
    pub fn total_record_count(&self) -> i64 {
        self.total_record_count
    }

    /// Term of the newest record, or 0 for an empty changelog.
    pub fn last_term(&self) -> i32 {
        self.last_term
    }

    pub fn append(&mut self, record: ChangelogRecord) -> Result<Version, ChangelogError> {
        if record.record_id != self.record_count {
            return Err(ChangelogError::NonSequentialAppend {
                segment_id: self.segment_id,
                expected: self.record_count,
                attempted: record.record_id,
            });
        }
        let line = serde_json::to_string(&record)?;
        Self::append_line(&Self::segment_path(&self.root, self.segment_id), &line)?;
        let version = Version::new(self.segment_id, record.record_id);
        self.record_count += 1;
        self.total_record_count += 1;
        self.last_term = record.term;
        Ok(version)
    }

    /// Seals the current segment and starts the next one.
    pub fn rotate(&mut self) -> Result<Version, ChangelogError> {
        let next = self.next_version().rotate();
        File::create(Self::segment_path(&self.root, next.segment_id))?.sync_all()?;
        info!(
            "event=changelog_rotated sealed_segment={} records={} next_segment={}",
            self.segment_id, self.record_count, next.segment_id
        );
        self.segment_id = next.segment_id;
        self.record_count = 0;
        Ok(next)
    }

    pub fn segments(&self) -> Result<Vec<i32>, ChangelogError> {
        Self::list_segments(&self.root)
    }

    pub fn records(&self, segment_id: i32) -> Result<Vec<ChangelogRecord>, ChangelogError> {
        let path = Self::segment_path(&self.root, segment_id);
        if !path.exists() {
            return Err(ChangelogError::MissingSegment(segment_id));
        }
        Self::load_records(&path)
    }

    /// Returns every record at or after `from`, in log order.
    pub fn replay_from(
        &self,
        from: Version,
    ) -> Result<Vec<(Version, ChangelogRecord)>, ChangelogError> {
        let mut replayed = Vec::new();
        for segment_id in self.segments()? {
            if segment_id < from.segment_id {
                continue;
            }
            for record in self.records(segment_id)? {
                let version = Version::new(segment_id, record.record_id);
                if version >= from {
                    replayed.push((version, record));
                }
            }
        }
        Ok(replayed)
    }

    fn segment_path(root: &Path, segment_id: i32) -> PathBuf {
        root.join(format!("{segment_id:09}.{SEGMENT_EXTENSION}"))
    }

    fn list_segments(root: &Path) -> Result<Vec<i32>, ChangelogError> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SEGMENT_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<i32>().ok())
            {
                segments.push(id);
            }
        }
        segments.sort_unstable();
        Ok(segments)
    }

    fn append_line(path: &Path, line: &str) -> Result<(), ChangelogError> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(())
    }

    fn load_records(path: &Path) -> Result<Vec<ChangelogRecord>, ChangelogError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

#[derive(Debug, Error)]
pub enum ChangelogError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("segment {segment_id}: expected record {expected}, attempted {attempted}")]
    NonSequentialAppend {
        segment_id: i32,
        expected: i32,
        attempted: i32,
    },
    #[error("changelog segment {0} does not exist")]
    MissingSegment(i32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(record_id: i32, kind: &str) -> ChangelogRecord {
        ChangelogRecord {
            record_id,
            term: 1,
            mutation_type: kind.into(),
            data: kind.as_bytes().to_vec(),
            mutation_id: None,
            timestamp_us: 1_000 + record_id as u64,
            random_seed: record_id as u64,
        }
    }

    #[test]
    fn append_and_reopen_resumes_at_tail() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = ChangelogStore::open(tmp.path()).unwrap();
            assert_eq!(store.append(record(0, "a")).unwrap(), Version::new(0, 0));
            assert_eq!(store.append(record(1, "b")).unwrap(), Version::new(0, 1));
        }
        let store = ChangelogStore::open(tmp.path()).unwrap();
        assert_eq!(store.next_version(), Version::new(0, 2));
        assert_eq!(store.records(0).unwrap().len(), 2);
    }

    #[test]
    fn reopen_counts_records_across_segments() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = ChangelogStore::open(tmp.path()).unwrap();
            store.append(record(0, "a")).unwrap();
            store.append(record(1, "b")).unwrap();
            store.rotate().unwrap();
            store.append(ChangelogRecord {
                term: 3,
                ..record(0, "c")
            })
            .unwrap();
            store.rotate().unwrap();
        }
        let store = ChangelogStore::open(tmp.path()).unwrap();
        assert_eq!(store.next_version(), Version::new(2, 0));
        assert_eq!(store.total_record_count(), 3);
        assert_eq!(store.last_term(), 3);
    }

    #[test]
    fn rejects_gaps() {
        let tmp = TempDir::new().unwrap();
        let mut store = ChangelogStore::open(tmp.path()).unwrap();
        let err = store.append(record(3, "gap")).unwrap_err();
        assert!(matches!(
            err,
            ChangelogError::NonSequentialAppend {
                expected: 0,
                attempted: 3,
                ..
            }
        ));
    }

    #[test]
    fn rotation_starts_new_segment_and_replay_spans_both() {
        let tmp = TempDir::new().unwrap();
        let mut store = ChangelogStore::open(tmp.path()).unwrap();
        store.append(record(0, "a")).unwrap();
        store.append(record(1, "b")).unwrap();
        assert_eq!(store.rotate().unwrap(), Version::new(1, 0));
        store.append(record(0, "c")).unwrap();

        let reopened = ChangelogStore::open(tmp.path()).unwrap();
        assert_eq!(reopened.next_version(), Version::new(1, 1));
        assert_eq!(reopened.segments().unwrap(), vec![0, 1]);

        let replayed = reopened.replay_from(Version::new(0, 1)).unwrap();
        let versions: Vec<Version> = replayed.iter().map(|(v, _)| *v).collect();
        assert_eq!(versions, vec![Version::new(0, 1), Version::new(1, 0)]);
        assert_eq!(replayed[1].1.mutation_type, "c");
    }

    #[test]
    fn missing_segment_is_reported() {
        let tmp = TempDir::new().unwrap();
        let store = ChangelogStore::open(tmp.path()).unwrap();
        assert!(matches!(
            store.records(5),
            Err(ChangelogError::MissingSegment(5))
        ));
    }
}
