//! Error types for AoI operations.

use farsight_wire::WireError;
use thiserror::Error;

use crate::types::EntityId;

/// Errors surfaced by witness and cache-map operations.
#[derive(Debug, Error)]
pub enum AoiError {
    #[error("entity {0} is already in the AoI")]
    AlreadyInAoi(EntityId),

    #[error("entity {0} is not in the AoI")]
    NotInAoi(EntityId),

    #[error("entity {0} has no pending update request")]
    NotPending(EntityId),

    #[error("a witness cannot request an update for its own entity")]
    SelfRequest,

    #[error("entity {0} does not exist in the world")]
    NoSuchEntity(EntityId),

    #[error(transparent)]
    Wire(#[from] WireError),
}
