//! Login and challenge configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection-establishment strategy for login traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Udp,
    Tcp,
    WebSocket,
}

/// Retry and timeout policy for the login handler.
///
/// Loaded from the `[login]` section of the server configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Attempts per phase before giving up.
    pub num_requests: u32,

    /// Seconds before an individual request times out.
    pub timeout_secs: f64,

    /// Seconds between starting consecutive attempts.
    pub retry_interval_secs: f64,

    /// Transport used for login traffic.
    pub transport: TransportKind,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            num_requests: 10,
            timeout_secs: 8.0,
            retry_interval_secs: 1.0,
            transport: TransportKind::Udp,
        }
    }
}

impl LoginConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs_f64(self.retry_interval_secs)
    }
}

/// Server-side challenge selection and difficulty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Registered challenge type to issue, empty for none.
    pub challenge_type: String,

    /// Fraction of the nonce space admitted as graph edges, in (0, 100].
    /// Higher is easier.
    pub easiness: f32,

    /// Client-side bound on key-derivation iterations before a solve
    /// attempt is abandoned.
    pub max_solve_iterations: u32,

    /// Sleep duration for the delay challenge, in seconds.
    pub delay_secs: f64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            challenge_type: String::new(),
            easiness: 50.0,
            max_solve_iterations: 1000,
            delay_secs: 0.5,
        }
    }
}

impl ChallengeConfig {
    /// Clamps easiness into its valid range.
    pub fn clamped_easiness(&self) -> f32 {
        if self.easiness <= 0.0 {
            50.0
        } else {
            self.easiness.min(100.0)
        }
    }
}
