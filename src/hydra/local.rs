use crate::hydra::changelog::{ChangelogRecord, ChangelogStore};
use crate::hydra::context::MutationContext;
use crate::hydra::mutation::{
    CommitError, HydraManager, MutationId, MutationRequest, MutationResponse, PinFuture,
    ResponseOrigin,
};
use crate::hydra::version::{ElectionPriority, ReachableState, Version};
use crate::serialize::unix_micros;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

struct LocalState {
    version: Version,
    sequence_number: i64,
    last_mutation_term: i32,
    changelog: Option<ChangelogStore>,
    kept_responses: HashMap<MutationId, MutationResponse>,
}

/// Single-peer committer: every request is logged and applied in-process, in
/// submission order, before its future resolves.
///
/// The state lock is held while the handler runs, which makes this the single
/// writer for whatever automaton the handlers touch. Responses of mutations
/// carrying an id are kept so that a retry returns the first outcome instead of
/// applying twice. Kept responses live in memory only.
///
/// A manager built with [`LocalHydraManager::follower`] applies nothing
/// itself and hands requests that allow it to the leader.
pub struct LocalHydraManager {
    state: Mutex<LocalState>,
    term: i32,
    read_only: AtomicBool,
    leader: Option<Arc<dyn HydraManager>>,
}

impl LocalHydraManager {
    /// Volatile committer with no changelog.
    pub fn in_memory(term: i32) -> Self {
        Self::with_state(term, Version::default(), 0, 0, None)
    }

    /// Recovers the next version, sequence number and last mutation term from
    /// the changelog under `root` and keeps appending to it.
    pub fn open(term: i32, root: impl Into<PathBuf>) -> Result<Self, CommitError> {
        let changelog = ChangelogStore::open(root)?;
        let version = changelog.next_version();
        let sequence_number = changelog.total_record_count();
        let last_mutation_term = changelog.last_term();
        info!(
            "event=hydra_local_open root={} version={version} sequence={sequence_number} last_mutation_term={last_mutation_term}",
            changelog.root().display()
        );
        Ok(Self::with_state(
            term,
            version,
            sequence_number,
            last_mutation_term,
            Some(changelog),
        ))
    }

    /// Non-leading peer that forwards requests to `leader`.
    pub fn follower(term: i32, leader: Arc<dyn HydraManager>) -> Self {
        Self {
            leader: Some(leader),
            ..Self::in_memory(term)
        }
    }

    fn with_state(
        term: i32,
        version: Version,
        sequence_number: i64,
        last_mutation_term: i32,
        changelog: Option<ChangelogStore>,
    ) -> Self {
        Self {
            state: Mutex::new(LocalState {
                version,
                sequence_number,
                last_mutation_term,
                changelog,
                kept_responses: HashMap::new(),
            }),
            term,
            read_only: AtomicBool::new(false),
            leader: None,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leader.is_none()
    }

    pub fn logged_version(&self) -> Version {
        self.state.lock().version
    }

    pub fn reachable_state(&self) -> ReachableState {
        let state = self.state.lock();
        ReachableState::new(state.version.segment_id, state.sequence_number)
    }

    pub fn election_priority(&self) -> ElectionPriority {
        let state = self.state.lock();
        ElectionPriority::new(
            self.term,
            state.last_mutation_term,
            ReachableState::new(state.version.segment_id, state.sequence_number),
        )
    }

    pub fn set_read_only(&self, value: bool) {
        self.read_only.store(value, Ordering::SeqCst);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Starts a new changelog segment; the next mutation lands at `(segment + 1, 0)`.
    pub fn rotate_changelog(&self) -> Result<Version, CommitError> {
        let mut state = self.state.lock();
        let next = match state.changelog.as_mut() {
            Some(changelog) => changelog.rotate()?,
            None => state.version.rotate(),
        };
        state.version = next;
        Ok(next)
    }

    fn commit_now(&self, request: MutationRequest) -> Result<MutationResponse, CommitError> {
        if self.is_read_only() {
            return Err(CommitError::ReadOnly);
        }
        let mut state = self.state.lock();
        if let Some(id) = request.mutation_id {
            if let Some(kept) = state.kept_responses.get(&id) {
                if !request.retry {
                    return Err(CommitError::Rejected {
                        mutation_type: request.mutation_type,
                        reason: format!("duplicate mutation {id} is not marked as retry"),
                    });
                }
                debug!(
                    "event=hydra_local_kept_response type={} id={id}",
                    request.mutation_type
                );
                return Ok(MutationResponse {
                    origin: ResponseOrigin::ResponseKeeper,
                    data: kept.data.clone(),
                });
            }
        }

        let version = state.version;
        let timestamp = SystemTime::now();
        let random_seed = version.to_revision() ^ unix_micros(timestamp);

        if let Some(changelog) = state.changelog.as_mut() {
            changelog.append(ChangelogRecord {
                record_id: version.record_id,
                term: self.term,
                mutation_type: request.mutation_type.clone(),
                data: request.data.clone(),
                mutation_id: request.mutation_id,
                timestamp_us: unix_micros(timestamp),
                random_seed,
            })?;
        }
        // The record is durable from here on; the in-memory position must match
        // it even if the handler panics.
        state.version = version.advance(1);
        state.sequence_number += 1;
        state.last_mutation_term = self.term;

        let mut context = MutationContext::new(version, &request, timestamp, random_seed);
        if let Some(handler) = request.handler.clone() {
            handler(&mut context);
        }
        let keep = !context.response_keeper_suppressed();
        let mut response = context.into_response();
        response.origin = ResponseOrigin::Commit;
        if let (Some(id), true) = (request.mutation_id, keep) {
            state.kept_responses.insert(id, response.clone());
        }
        debug!(
            "event=hydra_local_commit type={} version={version}",
            request.mutation_type
        );
        Ok(response)
    }
}

impl HydraManager for LocalHydraManager {
    fn commit_mutation(
        &self,
        request: MutationRequest,
    ) -> PinFuture<Result<MutationResponse, CommitError>> {
        let Some(leader) = self.leader.as_ref() else {
            let result = self.commit_now(request);
            return Box::pin(async move { result });
        };
        if !request.allow_leader_forwarding {
            return Box::pin(async { Err(CommitError::NotActiveLeader) });
        }
        debug!("event=hydra_local_forward type={}", request.mutation_type);
        let forwarded = leader.commit_mutation(request);
        Box::pin(async move {
            let mut response = forwarded.await?;
            response.origin = ResponseOrigin::LeaderForwarding;
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydra::mutation::create_mutation;
    use tempfile::TempDir;

    #[tokio::test]
    async fn commits_advance_version_and_run_handler() {
        let hydra = Arc::new(LocalHydraManager::in_memory(3));
        let seen = Arc::new(Mutex::new(Vec::new()));
        for payload in [b"a".to_vec(), b"b".to_vec()] {
            let seen = seen.clone();
            create_mutation(hydra.clone())
                .set_request_data(payload, "append")
                .set_action(move |context| {
                    seen.lock().push(context.version());
                    let echoed = context.request().data.clone();
                    context.set_response_data(echoed);
                })
                .commit()
                .await
                .unwrap();
        }
        assert_eq!(
            seen.lock().as_slice(),
            [Version::new(0, 0), Version::new(0, 1)]
        );
        assert_eq!(hydra.logged_version(), Version::new(0, 2));
        let priority = hydra.election_priority();
        assert_eq!(priority.last_mutation_term, 3);
        assert_eq!(priority.reachable_state.sequence_number, 2);
    }

    #[tokio::test]
    async fn read_only_rejects_commits() {
        let hydra = Arc::new(LocalHydraManager::in_memory(1));
        hydra.set_read_only(true);
        let result = create_mutation(hydra.clone())
            .set_request_data(Vec::new(), "noop")
            .commit()
            .await;
        assert!(matches!(result, Err(CommitError::ReadOnly)));
        assert_eq!(hydra.logged_version(), Version::default());
    }

    #[tokio::test]
    async fn reopen_recovers_version_from_changelog() {
        let tmp = TempDir::new().unwrap();
        {
            let hydra = Arc::new(LocalHydraManager::open(1, tmp.path()).unwrap());
            for _ in 0..3 {
                create_mutation(hydra.clone())
                    .set_request_data(b"x".to_vec(), "tick")
                    .commit()
                    .await
                    .unwrap();
            }
            assert_eq!(hydra.rotate_changelog().unwrap(), Version::new(1, 0));
            create_mutation(hydra.clone())
                .set_request_data(b"y".to_vec(), "tick")
                .commit()
                .await
                .unwrap();
        }
        let reopened = LocalHydraManager::open(2, tmp.path()).unwrap();
        assert_eq!(reopened.logged_version(), Version::new(1, 1));
        assert_eq!(reopened.reachable_state(), ReachableState::new(1, 4));
        assert_eq!(reopened.election_priority().last_mutation_term, 1);
    }

    #[tokio::test]
    async fn reopened_peer_keeps_its_election_standing() {
        let tmp = TempDir::new().unwrap();
        let before = {
            let hydra = Arc::new(LocalHydraManager::open(4, tmp.path()).unwrap());
            for _ in 0..3 {
                create_mutation(hydra.clone())
                    .set_request_data(b"x".to_vec(), "tick")
                    .commit()
                    .await
                    .unwrap();
            }
            hydra.election_priority()
        };
        let reopened = LocalHydraManager::open(4, tmp.path()).unwrap();
        assert_eq!(reopened.reachable_state(), ReachableState::new(0, 3));
        assert_eq!(reopened.election_priority(), before);
        assert!(reopened.election_priority() > LocalHydraManager::in_memory(4).election_priority());
    }

    #[tokio::test]
    async fn panicking_handler_does_not_wedge_the_log() {
        let tmp = TempDir::new().unwrap();
        let hydra = Arc::new(LocalHydraManager::open(1, tmp.path()).unwrap());
        let mut request = MutationRequest::new("boom");
        request.handler = Some(Arc::new(|_: &mut MutationContext<'_>| panic!("handler failed")));
        let panicking = hydra.clone();
        let outcome = std::thread::spawn(move || panicking.commit_now(request)).join();
        assert!(outcome.is_err());
        assert_eq!(hydra.logged_version(), Version::new(0, 1));

        create_mutation(hydra.clone())
            .set_request_data(Vec::new(), "tick")
            .commit()
            .await
            .unwrap();
        assert_eq!(hydra.logged_version(), Version::new(0, 2));
    }

    #[tokio::test]
    async fn retried_mutation_returns_kept_response() {
        let hydra = Arc::new(LocalHydraManager::in_memory(1));
        let applied = Arc::new(Mutex::new(0));
        let submit = |retry: bool| {
            let applied = applied.clone();
            create_mutation(hydra.clone())
                .set_id(MutationId::new(7, 7))
                .set_retry(retry)
                .set_request_data(Vec::new(), "incr")
                .set_action(move |context| {
                    *applied.lock() += 1;
                    context.set_response_data(b"done".to_vec());
                })
                .commit()
        };

        let first = submit(false).await.unwrap();
        assert_eq!(first.origin, ResponseOrigin::Commit);
        let retried = submit(true).await.unwrap();
        assert_eq!(retried.origin, ResponseOrigin::ResponseKeeper);
        assert_eq!(retried.data, b"done".to_vec());
        assert!(matches!(
            submit(false).await,
            Err(CommitError::Rejected { .. })
        ));
        assert_eq!(*applied.lock(), 1);
        assert_eq!(hydra.logged_version(), Version::new(0, 1));
    }

    #[tokio::test]
    async fn suppressed_response_is_not_kept() {
        let hydra = Arc::new(LocalHydraManager::in_memory(1));
        for _ in 0..2 {
            let response = create_mutation(hydra.clone())
                .set_id(MutationId::new(1, 1))
                .set_retry(true)
                .set_request_data(Vec::new(), "volatile")
                .set_action(|context| context.set_response_keeper_suppressed(true))
                .commit()
                .await
                .unwrap();
            assert_eq!(response.origin, ResponseOrigin::Commit);
        }
        assert_eq!(hydra.logged_version(), Version::new(0, 2));
    }

    #[tokio::test]
    async fn follower_forwards_only_when_allowed() {
        let leader = Arc::new(LocalHydraManager::in_memory(2));
        let follower = Arc::new(LocalHydraManager::follower(2, leader.clone()));
        assert!(!follower.is_leader());

        let rejected = create_mutation(follower.clone())
            .set_request_data(Vec::new(), "put")
            .commit()
            .await;
        assert!(matches!(rejected, Err(CommitError::NotActiveLeader)));

        let forwarded = create_mutation(follower.clone())
            .set_request_data(b"v".to_vec(), "put")
            .set_allow_leader_forwarding(true)
            .set_action(|context| {
                let data = context.request().data.clone();
                context.set_response_data(data);
            })
            .commit()
            .await
            .unwrap();
        assert_eq!(forwarded.origin, ResponseOrigin::LeaderForwarding);
        assert_eq!(forwarded.data, b"v".to_vec());
        assert_eq!(leader.logged_version(), Version::new(0, 1));
        assert_eq!(follower.logged_version(), Version::default());
    }
}
