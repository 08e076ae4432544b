//! Replicated mutation primitives: log positions, election priorities and the
//! mutation commit pipeline.

pub mod changelog;
pub mod context;
pub mod election;
pub mod local;
pub mod mutation;
pub mod version;

pub use changelog::{ChangelogError, ChangelogRecord, ChangelogStore};
pub use context::MutationContext;
pub use election::{choose_leader, rank_candidates, ElectionCandidate, PeerId, VoteTally};
pub use local::LocalHydraManager;
pub use mutation::{
    create_mutation, CommitError, HydraManager, Mutation, MutationHandler, MutationId,
    MutationRequest, MutationResponse, PinFuture, ResponseOrigin,
};
pub use version::{ElectionPriority, ReachableState, Revision, Version, VersionParseError};
