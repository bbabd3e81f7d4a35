//! Login challenges and their factory registry.
//!
//! A login application may answer the first request of a session with a
//! challenge instead of a verdict. The client computes a response and
//! retries with it attached; the server verifies before looking at the
//! credentials at all. Challenge types are registered explicitly at
//! startup, never through global state, so two connections can run
//! entirely different challenge sets.

pub mod always_fail;
pub mod cuckoo;
pub mod delay;

use std::collections::HashMap;
use std::sync::Arc;

use farsight_wire::{BinaryReader, BinaryWriter};

use crate::config::ChallengeConfig;
use crate::error::LoginError;

pub use always_fail::AlwaysFailFactory;
pub use cuckoo::CuckooCycleFactory;
pub use delay::DelayFactory;

/// One challenge instance, server- or client-side.
///
/// The server writes the challenge parameters; the client reads them,
/// solves, and writes a response; the server verifies it.
pub trait LoginChallenge: Send {
    fn challenge_type(&self) -> &'static str;

    /// Server side: emits the challenge parameters.
    fn write_challenge(&self, w: &mut BinaryWriter) -> Result<(), LoginError>;

    /// Client side: computes the response. May take real CPU time; run it
    /// on a background executor when latency matters.
    fn solve(&mut self) -> Result<(), LoginError>;

    /// Client side: emits the solved response.
    fn write_response(&self, w: &mut BinaryWriter) -> Result<(), LoginError>;

    /// Server side: checks a response against this challenge's parameters.
    fn verify_response(&self, r: &mut BinaryReader<'_>) -> Result<bool, LoginError>;
}

/// Creates challenge instances of one registered type.
pub trait ChallengeFactory: Send + Sync {
    fn challenge_type(&self) -> &'static str;

    /// Server side: a fresh challenge with new parameters.
    fn create(&self) -> Box<dyn LoginChallenge>;

    /// Client side: reconstructs a challenge from its wire parameters.
    fn read(&self, r: &mut BinaryReader<'_>) -> Result<Box<dyn LoginChallenge>, LoginError>;
}

/// Explicit, per-connection registry of challenge factories.
#[derive(Default)]
pub struct ChallengeFactoryRegistry {
    factories: HashMap<&'static str, Arc<dyn ChallengeFactory>>,
}

impl ChallengeFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every production and test factory, configured from
    /// `config`.
    pub fn with_defaults(config: &ChallengeConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CuckooCycleFactory::new(
            config.clamped_easiness(),
            config.max_solve_iterations,
        )));
        registry.register(Arc::new(DelayFactory::new(config.delay_secs)));
        registry.register(Arc::new(AlwaysFailFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn ChallengeFactory>) {
        self.factories.insert(factory.challenge_type(), factory);
    }

    pub fn get(&self, challenge_type: &str) -> Result<Arc<dyn ChallengeFactory>, LoginError> {
        self.factories
            .get(challenge_type)
            .cloned()
            .ok_or_else(|| LoginError::UnknownChallengeType(challenge_type.to_string()))
    }

    /// Client-side entry point: reads a challenge of the named type from
    /// the stream.
    pub fn read_challenge(
        &self,
        challenge_type: &str,
        r: &mut BinaryReader<'_>,
    ) -> Result<Box<dyn LoginChallenge>, LoginError> {
        self.get(challenge_type)?.read(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_is_an_error() {
        let registry = ChallengeFactoryRegistry::new();
        let bytes: [u8; 0] = [];
        let mut r = BinaryReader::new(&bytes);
        assert!(matches!(
            registry.read_challenge("nope", &mut r),
            Err(LoginError::UnknownChallengeType(_))
        ));
    }

    #[test]
    fn test_default_registry_has_all_types() {
        let registry = ChallengeFactoryRegistry::with_defaults(&ChallengeConfig::default());
        assert!(registry.get("cuckoo_cycle").is_ok());
        assert!(registry.get("delay").is_ok());
        assert!(registry.get("fail").is_ok());
    }
}
