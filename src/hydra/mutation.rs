use crate::hydra::changelog::ChangelogError;
use crate::hydra::context::MutationContext;
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub type PinFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Action executed against the automaton when the mutation is applied.
pub type MutationHandler = Arc<dyn Fn(&mut MutationContext<'_>) + Send + Sync>;

type SuccessContinuation = Box<dyn FnOnce(&MutationResponse) + Send>;
type ErrorContinuation = Box<dyn FnOnce(&CommitError) + Send>;

/// Client-chosen identity used to deduplicate retried mutations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId([u64; 2]);

impl MutationId {
    pub fn new(high: u64, low: u64) -> Self {
        Self([high, low])
    }

    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self([rng.gen(), rng.gen()])
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0, 0]
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.0[0], self.0[1])
    }
}

#[derive(Clone, Default)]
pub struct MutationRequest {
    pub mutation_type: String,
    pub data: Vec<u8>,
    pub handler: Option<MutationHandler>,
    pub mutation_id: Option<MutationId>,
    pub allow_leader_forwarding: bool,
    pub retry: bool,
}

impl MutationRequest {
    pub fn new(mutation_type: impl Into<String>) -> Self {
        Self {
            mutation_type: mutation_type.into(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for MutationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationRequest")
            .field("mutation_type", &self.mutation_type)
            .field("data_len", &self.data.len())
            .field("has_handler", &self.handler.is_some())
            .field("mutation_id", &self.mutation_id)
            .field("allow_leader_forwarding", &self.allow_leader_forwarding)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseOrigin {
    #[default]
    Commit,
    LeaderForwarding,
    ResponseKeeper,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationResponse {
    pub origin: ResponseOrigin,
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("peer is not an active leader")]
    NotActiveLeader,
    #[error("peer is read-only")]
    ReadOnly,
    #[error("mutation {mutation_type} rejected: {reason}")]
    Rejected {
        mutation_type: String,
        reason: String,
    },
    #[error(transparent)]
    Changelog(#[from] ChangelogError),
}

/// Replication layer that assigns each request a slot in the ordered log.
pub trait HydraManager: Send + Sync {
    fn commit_mutation(
        &self,
        request: MutationRequest,
    ) -> PinFuture<Result<MutationResponse, CommitError>>;
}

/// A single state transition on its way into the replicated log.
///
/// Built by chaining setters; `commit` consumes the mutation, so nothing can be
/// reconfigured once it has been submitted. Each continuation slot may be filled
/// once; filling it again is a programming error and panics.
pub struct Mutation {
    hydra_manager: Arc<dyn HydraManager>,
    request: MutationRequest,
    on_success: Option<SuccessContinuation>,
    on_error: Option<ErrorContinuation>,
}

impl Mutation {
    pub fn new(hydra_manager: Arc<dyn HydraManager>) -> Self {
        Self {
            hydra_manager,
            request: MutationRequest::default(),
            on_success: None,
            on_error: None,
        }
    }

    pub fn set_id(mut self, id: MutationId) -> Self {
        self.request.mutation_id = Some(id);
        self
    }

    pub fn set_request_data(mut self, data: Vec<u8>, mutation_type: impl Into<String>) -> Self {
        self.request.data = data;
        self.request.mutation_type = mutation_type.into();
        self
    }

    pub fn set_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut MutationContext<'_>) + Send + Sync + 'static,
    {
        self.request.handler = Some(Arc::new(action));
        self
    }

    pub fn set_allow_leader_forwarding(mut self, value: bool) -> Self {
        self.request.allow_leader_forwarding = value;
        self
    }

    pub fn set_retry(mut self, value: bool) -> Self {
        self.request.retry = value;
        self
    }

    pub fn request(&self) -> &MutationRequest {
        &self.request
    }

    /// Registers a success continuation that ignores the response body.
    pub fn on_success<F>(self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_success_with_response(move |_| callback())
    }

    pub fn on_success_with_response<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&MutationResponse) + Send + 'static,
    {
        assert!(
            self.on_success.is_none(),
            "mutation success continuation is already registered"
        );
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&CommitError) + Send + 'static,
    {
        assert!(
            self.on_error.is_none(),
            "mutation error continuation is already registered"
        );
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Submits the request and resolves with the replication outcome.
    ///
    /// Continuations run on whatever task polls the returned future and only
    /// observe the result; it is returned unchanged.
    pub fn commit(self) -> impl Future<Output = Result<MutationResponse, CommitError>> + Send {
        let Mutation {
            hydra_manager,
            request,
            on_success,
            on_error,
        } = self;
        let mutation_type = request.mutation_type.clone();
        let pending = hydra_manager.commit_mutation(request);
        async move {
            let result = pending.await;
            match &result {
                Ok(response) => {
                    debug!(
                        "event=mutation_committed type={} origin={:?}",
                        mutation_type, response.origin
                    );
                    if let Some(callback) = on_success {
                        callback(response);
                    }
                }
                Err(err) => {
                    warn!("event=mutation_commit_failed type={mutation_type} error={err}");
                    if let Some(callback) = on_error {
                        callback(err);
                    }
                }
            }
            result
        }
    }
}

pub fn create_mutation(hydra_manager: Arc<dyn HydraManager>) -> Mutation {
    Mutation::new(hydra_manager)
}
