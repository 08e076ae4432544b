use crate::table::retention::{RetentionConfig, RetentionConfigError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Per-tablet tuning for compaction, partitioning and sampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabletConfig {
    /// Forces a compaction of every partition at least this often.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_compaction_period_ms: Option<u64>,
    pub min_partition_data_size: u64,
    pub max_partition_data_size: u64,
    pub max_partition_count: usize,
    pub samples_per_partition: usize,
    /// Delay after an epoch start before a partition may be split.
    pub split_delay_ms: u64,
    pub retention: RetentionConfig,
}

impl Default for TabletConfig {
    fn default() -> Self {
        Self {
            auto_compaction_period_ms: None,
            min_partition_data_size: 96 * 1024 * 1024,
            max_partition_data_size: 320 * 1024 * 1024,
            max_partition_count: 10_240,
            samples_per_partition: 100,
            split_delay_ms: 0,
            retention: RetentionConfig::default(),
        }
    }
}

impl TabletConfig {
    pub fn auto_compaction_period(&self) -> Option<Duration> {
        self.auto_compaction_period_ms.map(Duration::from_millis)
    }

    pub fn split_delay(&self) -> Duration {
        Duration::from_millis(self.split_delay_ms)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, TabletConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, TabletConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), TabletConfigError> {
        if self.min_partition_data_size > self.max_partition_data_size {
            return Err(TabletConfigError::PartitionSizeBounds {
                min: self.min_partition_data_size,
                max: self.max_partition_data_size,
            });
        }
        if self.max_partition_count == 0 {
            return Err(TabletConfigError::ZeroPartitionCount);
        }
        self.retention.validate()?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum TabletConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("min_partition_data_size {min} exceeds max_partition_data_size {max}")]
    PartitionSizeBounds { min: u64, max: u64 },
    #[error("max_partition_count must be positive")]
    ZeroPartitionCount,
    #[error(transparent)]
    Retention(#[from] RetentionConfigError),
}
