use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Packed 64-bit form of a [`Version`]: segment in the high half, record in the low half.
pub type Revision = u64;

/// How far a replica has replayed its log.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ReachableState {
    pub segment_id: i32,
    pub sequence_number: i64,
}

impl ReachableState {
    pub fn new(segment_id: i32, sequence_number: i64) -> Self {
        Self {
            segment_id,
            sequence_number,
        }
    }
}

impl fmt::Display for ReachableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_id, self.sequence_number)
    }
}

/// Eligibility of a peer to become leader.
///
/// Ordering (and therefore equality) only looks at `last_mutation_term` and then
/// `reachable_state.sequence_number`; `term` and the segment id are carried for
/// reporting but never decide an election.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ElectionPriority {
    pub term: i32,
    pub last_mutation_term: i32,
    pub reachable_state: ReachableState,
}

impl ElectionPriority {
    pub fn new(term: i32, last_mutation_term: i32, reachable_state: ReachableState) -> Self {
        Self {
            term,
            last_mutation_term,
            reachable_state,
        }
    }

    pub fn from_parts(
        term: i32,
        last_mutation_term: i32,
        segment_id: i32,
        sequence_number: i64,
    ) -> Self {
        Self::new(
            term,
            last_mutation_term,
            ReachableState::new(segment_id, sequence_number),
        )
    }

    fn ordering_key(&self) -> (i32, i64) {
        (
            self.last_mutation_term,
            self.reachable_state.sequence_number,
        )
    }
}

impl PartialEq for ElectionPriority {
    fn eq(&self, other: &Self) -> bool {
        self.ordering_key() == other.ordering_key()
    }
}

impl Eq for ElectionPriority {}

impl PartialOrd for ElectionPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ElectionPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordering_key().cmp(&other.ordering_key())
    }
}

impl fmt::Display for ElectionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{term: {}, mutation_term: {}, state: {}}}",
            self.term, self.last_mutation_term, self.reachable_state
        )
    }
}

/// Position of a record inside the replicated changelog.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
    pub segment_id: i32,
    pub record_id: i32,
}

impl Version {
    pub fn new(segment_id: i32, record_id: i32) -> Self {
        Self {
            segment_id,
            record_id,
        }
    }

    pub fn to_revision(&self) -> Revision {
        ((self.segment_id as u32 as Revision) << 32) | (self.record_id as u32 as Revision)
    }

    pub fn from_revision(revision: Revision) -> Self {
        Self::new(
            (revision >> 32) as u32 as i32,
            (revision & 0xffff_ffff) as u32 as i32,
        )
    }

    /// Moves `delta` records forward within the current segment.
    pub fn advance(&self, delta: i32) -> Self {
        assert!(delta >= 0, "version advance delta must be non-negative: {delta}");
        Self::new(self.segment_id, self.record_id + delta)
    }

    /// Opens the next segment.
    pub fn rotate(&self) -> Self {
        Self::new(self.segment_id + 1, 0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_id, self.record_id)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("version must look like <segment>:<record>, got {0:?}")]
    Malformed(String),
    #[error("invalid version component {component:?}")]
    InvalidComponent { component: String },
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (segment, record) = s
            .split_once(':')
            .ok_or_else(|| VersionParseError::Malformed(s.to_string()))?;
        let parse = |component: &str| {
            component
                .trim()
                .parse::<i32>()
                .map_err(|_| VersionParseError::InvalidComponent {
                    component: component.to_string(),
                })
        };
        Ok(Self::new(parse(segment)?, parse(record)?))
    }
}
