use crate::hydra::changelog::ChangelogError;
use crate::hydra::mutation::CommitError;
use crate::hydra::version::VersionParseError;
use crate::serialize::SerializeError;
use crate::table::retention::RetentionConfigError;
use crate::tablet::config::TabletConfigError;
use crate::tablet::core::PartitionLayoutError;
use thiserror::Error;

/// Umbrella error for callers that drive both the mutation pipeline and the
/// tablet layer.
#[derive(Debug, Error)]
pub enum HydraTabletError {
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error(transparent)]
    Changelog(#[from] ChangelogError),
    #[error(transparent)]
    Version(#[from] VersionParseError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error(transparent)]
    Retention(#[from] RetentionConfigError),
    #[error(transparent)]
    Config(#[from] TabletConfigError),
    #[error(transparent)]
    Layout(#[from] PartitionLayoutError),
}
