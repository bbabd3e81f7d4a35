//! Challenge execution off the login poll path.
//!
//! Solving a proof-of-work challenge can take hundreds of milliseconds, far
//! too long to block the handler's poll loop. Executors take a challenge,
//! solve it somewhere, and hand the solved instance back over a channel the
//! handler checks on every poll.

use crossbeam_channel::{bounded, Receiver};

use crate::challenge::LoginChallenge;
use crate::error::LoginError;

/// Result of solving one challenge: the solved instance, ready to have its
/// response written, or the error that stopped it.
pub struct ChallengeOutcome {
    pub result: Result<Box<dyn LoginChallenge>, LoginError>,
}

/// Runs challenge solves and reports completion over a channel.
pub trait ChallengeExecutor: Send {
    fn execute(&self, challenge: Box<dyn LoginChallenge>) -> Receiver<ChallengeOutcome>;
}

/// Solves on the calling thread before returning. Fine for tests and for
/// cheap challenge types.
pub struct InlineExecutor;

impl ChallengeExecutor for InlineExecutor {
    fn execute(&self, mut challenge: Box<dyn LoginChallenge>) -> Receiver<ChallengeOutcome> {
        let (tx, rx) = bounded(1);
        let result = challenge.solve().map(|()| challenge);
        // Receiver outlives us; a dropped receiver just discards the result.
        let _ = tx.send(ChallengeOutcome { result });
        rx
    }
}

/// Solves on a freshly spawned thread, one per challenge. Challenges are
/// rare enough (one per login) that a pool is not worth carrying.
pub struct ThreadExecutor;

impl ChallengeExecutor for ThreadExecutor {
    fn execute(&self, mut challenge: Box<dyn LoginChallenge>) -> Receiver<ChallengeOutcome> {
        let (tx, rx) = bounded(1);
        std::thread::spawn(move || {
            let result = challenge.solve().map(|()| challenge);
            let _ = tx.send(ChallengeOutcome { result });
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::delay::DelayChallenge;

    #[test]
    fn test_inline_executor_completes_immediately() {
        let rx = InlineExecutor.execute(Box::new(DelayChallenge::new(0.0)));
        let outcome = rx.try_recv().unwrap();
        assert!(outcome.result.is_ok());
    }

    #[test]
    fn test_thread_executor_delivers() {
        let rx = ThreadExecutor.execute(Box::new(DelayChallenge::new(0.01)));
        let outcome = rx.recv().unwrap();
        assert!(outcome.result.is_ok());
    }
}
