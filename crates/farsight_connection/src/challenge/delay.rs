//! Test challenge that makes the client sit out a fixed delay.

use std::time::Duration;

use farsight_wire::{BinaryReader, BinaryWriter};

use super::{ChallengeFactory, LoginChallenge};
use crate::error::LoginError;

pub const CHALLENGE_TYPE: &str = "delay";

pub struct DelayChallenge {
    duration: Duration,
}

impl DelayChallenge {
    pub fn new(delay_secs: f64) -> Self {
        Self {
            duration: Duration::from_secs_f64(delay_secs.max(0.0)),
        }
    }
}

impl LoginChallenge for DelayChallenge {
    fn challenge_type(&self) -> &'static str {
        CHALLENGE_TYPE
    }

    fn write_challenge(&self, w: &mut BinaryWriter) -> Result<(), LoginError> {
        w.write_u64(self.duration.as_millis() as u64);
        Ok(())
    }

    fn solve(&mut self) -> Result<(), LoginError> {
        std::thread::sleep(self.duration);
        Ok(())
    }

    fn write_response(&self, _w: &mut BinaryWriter) -> Result<(), LoginError> {
        Ok(())
    }

    fn verify_response(&self, _r: &mut BinaryReader<'_>) -> Result<bool, LoginError> {
        Ok(true)
    }
}

/// Issues delay challenges of a configured duration.
pub struct DelayFactory {
    duration: Duration,
}

impl DelayFactory {
    pub fn new(delay_secs: f64) -> Self {
        Self {
            duration: Duration::from_secs_f64(delay_secs.max(0.0)),
        }
    }
}

impl ChallengeFactory for DelayFactory {
    fn challenge_type(&self) -> &'static str {
        CHALLENGE_TYPE
    }

    fn create(&self) -> Box<dyn LoginChallenge> {
        Box::new(DelayChallenge {
            duration: self.duration,
        })
    }

    fn read(&self, r: &mut BinaryReader<'_>) -> Result<Box<dyn LoginChallenge>, LoginError> {
        let millis = r.read_u64()?;
        Ok(Box::new(DelayChallenge {
            duration: Duration::from_millis(millis),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_verify() {
        let factory = DelayFactory::new(0.0);
        let server = factory.create();
        let mut w = BinaryWriter::new();
        server.write_challenge(&mut w).unwrap();
        let bytes = w.into_bytes();

        let mut r = BinaryReader::new(&bytes);
        let mut client = factory.read(&mut r).unwrap();
        client.solve().unwrap();

        let mut resp = BinaryWriter::new();
        client.write_response(&mut resp).unwrap();
        let resp_bytes = resp.into_bytes();
        let mut rr = BinaryReader::new(&resp_bytes);
        assert!(server.verify_response(&mut rr).unwrap());
    }
}
