//! Error types for the login pipeline.

use farsight_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("unknown challenge type: {0}")]
    UnknownChallengeType(String),

    #[error("challenge could not be solved within the iteration bound")]
    ChallengeUnsolvable,

    #[error("challenge response failed verification")]
    ChallengeRejected,

    #[error("login parameter sealing failed: {0}")]
    Cipher(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("server offered session key {0:#x}, which is invalid here")]
    InvalidSessionKey(u32),

    #[error("login handler already finished")]
    AlreadyFinished,

    #[error("invalid login configuration: {0}")]
    Config(String),
}
