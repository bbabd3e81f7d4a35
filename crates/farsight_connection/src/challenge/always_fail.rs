//! Test challenge that no client can pass.

use farsight_wire::{BinaryReader, BinaryWriter};

use super::{ChallengeFactory, LoginChallenge};
use crate::error::LoginError;

pub const CHALLENGE_TYPE: &str = "fail";

struct AlwaysFailChallenge;

impl LoginChallenge for AlwaysFailChallenge {
    fn challenge_type(&self) -> &'static str {
        CHALLENGE_TYPE
    }

    fn write_challenge(&self, _w: &mut BinaryWriter) -> Result<(), LoginError> {
        Ok(())
    }

    fn solve(&mut self) -> Result<(), LoginError> {
        Err(LoginError::ChallengeUnsolvable)
    }

    fn write_response(&self, _w: &mut BinaryWriter) -> Result<(), LoginError> {
        Err(LoginError::ChallengeUnsolvable)
    }

    fn verify_response(&self, _r: &mut BinaryReader<'_>) -> Result<bool, LoginError> {
        Ok(false)
    }
}

/// Exercises the client's challenge-failure path.
pub struct AlwaysFailFactory;

impl ChallengeFactory for AlwaysFailFactory {
    fn challenge_type(&self) -> &'static str {
        CHALLENGE_TYPE
    }

    fn create(&self) -> Box<dyn LoginChallenge> {
        Box::new(AlwaysFailChallenge)
    }

    fn read(&self, _r: &mut BinaryReader<'_>) -> Result<Box<dyn LoginChallenge>, LoginError> {
        Ok(Box::new(AlwaysFailChallenge))
    }
}
