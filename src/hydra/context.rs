use crate::hydra::mutation::{MutationRequest, MutationResponse};
use crate::hydra::version::Version;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::time::SystemTime;

/// State handed to a mutation handler while the mutation is being applied.
///
/// Every replica applying the same record observes the same version, timestamp
/// and random sequence, so handlers must draw randomness from here rather than
/// from a process-wide generator.
pub struct MutationContext<'a> {
    version: Version,
    request: &'a MutationRequest,
    timestamp: SystemTime,
    random: ChaCha20Rng,
    response: MutationResponse,
    response_keeper_suppressed: bool,
}

impl<'a> MutationContext<'a> {
    pub fn new(
        version: Version,
        request: &'a MutationRequest,
        timestamp: SystemTime,
        random_seed: u64,
    ) -> Self {
        Self {
            version,
            request,
            timestamp,
            random: ChaCha20Rng::seed_from_u64(random_seed),
            response: MutationResponse::default(),
            response_keeper_suppressed: false,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn request(&self) -> &MutationRequest {
        self.request
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn random(&mut self) -> &mut ChaCha20Rng {
        &mut self.random
    }

    pub fn set_response_data(&mut self, data: Vec<u8>) {
        self.response.data = data;
    }

    pub fn response(&self) -> &MutationResponse {
        &self.response
    }

    pub fn set_response_keeper_suppressed(&mut self, value: bool) {
        self.response_keeper_suppressed = value;
    }

    pub fn response_keeper_suppressed(&self) -> bool {
        self.response_keeper_suppressed
    }

    pub fn into_response(self) -> MutationResponse {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn same_seed_yields_same_random_sequence() {
        let request = MutationRequest::new("noop");
        let now = SystemTime::now();
        let mut first = MutationContext::new(Version::new(1, 2), &request, now, 77);
        let mut second = MutationContext::new(Version::new(1, 2), &request, now, 77);
        let a: Vec<u32> = (0..4).map(|_| first.random().gen()).collect();
        let b: Vec<u32> = (0..4).map(|_| second.random().gen()).collect();
        assert_eq!(a, b);
        assert_eq!(first.version(), Version::new(1, 2));
        assert_eq!(first.request().mutation_type, "noop");
    }

    #[test]
    fn response_data_flows_out() {
        let request = MutationRequest::new("echo");
        let mut context = MutationContext::new(Version::default(), &request, SystemTime::now(), 1);
        context.set_response_data(b"ok".to_vec());
        context.set_response_keeper_suppressed(true);
        assert!(context.response_keeper_suppressed());
        assert_eq!(context.into_response().data, b"ok".to_vec());
    }
}
