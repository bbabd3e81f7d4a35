//! AoI enter/leave notification plumbing.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::types::EntityId;

/// Receives AoI membership callbacks for one witness.
///
/// Implementations are typically bridges into scripted game logic, so a
/// panic in a callback is contained and logged rather than unwinding into
/// the witness update loop.
pub trait AoiListener {
    fn on_entered_aoi(&mut self, owner: EntityId, entity: EntityId);
    fn on_left_aoi(&mut self, owner: EntityId, entity: EntityId);
}

/// Listener that ignores everything.
#[derive(Debug, Default)]
pub struct NullListener;

impl AoiListener for NullListener {
    fn on_entered_aoi(&mut self, _owner: EntityId, _entity: EntityId) {}
    fn on_left_aoi(&mut self, _owner: EntityId, _entity: EntityId) {}
}

pub(crate) fn notify_entered(listener: &mut dyn AoiListener, owner: EntityId, entity: EntityId) {
    if catch_unwind(AssertUnwindSafe(|| listener.on_entered_aoi(owner, entity))).is_err() {
        error!(
            "AoI listener panicked in on_entered_aoi (owner {}, entity {})",
            owner, entity
        );
    }
}

pub(crate) fn notify_left(listener: &mut dyn AoiListener, owner: EntityId, entity: EntityId) {
    if catch_unwind(AssertUnwindSafe(|| listener.on_left_aoi(owner, entity))).is_err() {
        error!(
            "AoI listener panicked in on_left_aoi (owner {}, entity {})",
            owner, entity
        );
    }
}
