use crate::table::value::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Timestamps tick in microseconds.
pub const TIMESTAMP_TICKS_PER_MILLI: u64 = 1_000;

/// How many historical versions of a cell survive compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub min_data_versions: usize,
    pub max_data_versions: usize,
    pub min_data_ttl_ms: u64,
    pub max_data_ttl_ms: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            min_data_versions: 1,
            max_data_versions: 1,
            min_data_ttl_ms: 0,
            max_data_ttl_ms: 24 * 60 * 60 * 1_000,
        }
    }
}

impl RetentionConfig {
    pub fn keep_versions(max_data_versions: usize) -> Self {
        Self {
            min_data_versions: max_data_versions.min(1),
            max_data_versions,
            ..Self::default()
        }
    }

    pub fn min_data_ttl(&self) -> Duration {
        Duration::from_millis(self.min_data_ttl_ms)
    }

    pub fn max_data_ttl(&self) -> Duration {
        Duration::from_millis(self.max_data_ttl_ms)
    }

    pub(crate) fn min_data_ttl_ticks(&self) -> Timestamp {
        self.min_data_ttl_ms.saturating_mul(TIMESTAMP_TICKS_PER_MILLI)
    }

    pub(crate) fn max_data_ttl_ticks(&self) -> Timestamp {
        self.max_data_ttl_ms.saturating_mul(TIMESTAMP_TICKS_PER_MILLI)
    }

    pub fn validate(&self) -> Result<(), RetentionConfigError> {
        if self.min_data_versions > self.max_data_versions {
            return Err(RetentionConfigError::VersionBounds {
                min: self.min_data_versions,
                max: self.max_data_versions,
            });
        }
        if self.min_data_ttl_ms > self.max_data_ttl_ms {
            return Err(RetentionConfigError::TtlBounds {
                min_ms: self.min_data_ttl_ms,
                max_ms: self.max_data_ttl_ms,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetentionConfigError {
    #[error("min_data_versions {min} exceeds max_data_versions {max}")]
    VersionBounds { min: usize, max: usize },
    #[error("min_data_ttl {min_ms}ms exceeds max_data_ttl {max_ms}ms")]
    TtlBounds { min_ms: u64, max_ms: u64 },
}
