use crate::hydra::version::ElectionPriority;
use std::cmp::Ordering;
use std::collections::HashMap;

pub type PeerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionCandidate {
    pub peer_id: PeerId,
    pub priority: ElectionPriority,
}

impl ElectionCandidate {
    pub fn new(peer_id: PeerId, priority: ElectionPriority) -> Self {
        Self { peer_id, priority }
    }

    /// Best candidate first: higher priority wins, equal priorities fall back to
    /// the lower peer id.
    fn preference(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.peer_id.cmp(&other.peer_id))
    }
}

pub fn rank_candidates(candidates: &mut [ElectionCandidate]) {
    candidates.sort_by(|a, b| a.preference(b));
}

pub fn choose_leader(candidates: &[ElectionCandidate]) -> Option<PeerId> {
    candidates
        .iter()
        .min_by(|a, b| a.preference(b))
        .map(|candidate| candidate.peer_id)
}

/// Collects votes for one election round. Each voter backs a single candidate;
/// a newer vote from the same voter replaces the previous one.
#[derive(Debug, Clone)]
pub struct VoteTally {
    quorum: usize,
    votes: HashMap<PeerId, ElectionCandidate>,
}

impl VoteTally {
    pub fn new(quorum: usize) -> Self {
        Self {
            quorum: quorum.max(1),
            votes: HashMap::new(),
        }
    }

    pub fn record_vote(&mut self, voter: PeerId, candidate: ElectionCandidate) {
        self.votes.insert(voter, candidate);
    }

    pub fn votes_for(&self, peer_id: PeerId) -> usize {
        self.votes
            .values()
            .filter(|candidate| candidate.peer_id == peer_id)
            .count()
    }

    /// The candidate backed by a quorum, if any.
    pub fn winner(&self) -> Option<ElectionCandidate> {
        let mut counts: HashMap<PeerId, (usize, ElectionCandidate)> = HashMap::new();
        for candidate in self.votes.values() {
            let entry = counts.entry(candidate.peer_id).or_insert((0, *candidate));
            entry.0 += 1;
        }
        counts
            .into_values()
            .filter(|(count, _)| *count >= self.quorum)
            .map(|(_, candidate)| candidate)
            .min_by(|a, b| a.preference(b))
    }
}
