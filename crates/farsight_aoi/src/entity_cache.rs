//! Per-(witness, entity) visibility state.

use farsight_wire::{BinaryReader, BinaryWriter, WireError};

use crate::types::{EntityId, EventNumber, IdAlias, NO_ID_ALIAS};

const GONE: u16 = 1 << 0;
const WITHHELD: u16 = 1 << 1;
const ENTER_PENDING: u16 = 1 << 2;
const REQUEST_PENDING: u16 = 1 << 3;
const CREATE_PENDING: u16 = 1 << 4;
const MANUALLY_ADDED: u16 = 1 << 5;
const ADDED_BY_TRIGGER: u16 = 1 << 6;
const REFRESH: u16 = 1 << 7;
const PRIORITISED: u16 = 1 << 8;
const IN_AOI_OFFLOAD: u16 = 1 << 9;
const ALWAYS_DETAILED: u16 = 1 << 10;

/// Client-visible lifecycle phase of a cache entry.
///
/// Exactly one phase describes an entry at any time; the remaining flags
/// (manual, trigger, refresh, prioritised, offload) are orthogonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Marked for removal; kept only until bookkeeping catches up.
    Gone,
    /// Suppressed from the client by script or capability checks.
    Withheld,
    /// Enter message not yet sent.
    EnterPending,
    /// Enter sent, waiting for the client to request creation.
    RequestPending,
    /// Client requested creation; full state not yet sent.
    CreatePending,
    /// Created on the client, receiving incremental updates.
    Updatable,
}

/// State a witness keeps about one entity in its AoI.
///
/// Caches never own their entity; they reference it by id and are dropped
/// without touching the world.
#[derive(Debug, Clone)]
pub struct EntityCache {
    id: EntityId,
    alias: IdAlias,
    priority: f64,
    flags: u16,
    /// Snapshot of the entity's vehicle id last told to the client,
    /// compared against the world each update.
    pub vehicle_snapshot: Option<EntityId>,
    /// Overall change counter of the last state sent to the client.
    pub last_event_number: EventNumber,
    /// Per-detail-level change counters the client holds, empty until the
    /// first create. Levels past the end count as never sent.
    pub lod_events: Vec<EventNumber>,
}

impl EntityCache {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            alias: NO_ID_ALIAS,
            priority: 0.0,
            flags: ENTER_PENDING,
            vehicle_snapshot: None,
            last_event_number: 0,
            lod_events: Vec::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn alias(&self) -> IdAlias {
        self.alias
    }

    pub fn set_alias(&mut self, alias: IdAlias) {
        self.alias = alias;
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: f64) {
        self.priority = priority;
    }

    /// Pushes this entry's next send further into the future. `delta` must
    /// be positive.
    pub fn defer(&mut self, delta: f64) {
        self.priority += delta;
    }

    pub fn state(&self) -> CacheState {
        if self.flags & GONE != 0 {
            CacheState::Gone
        } else {
            self.phase()
        }
    }

    /// Lifecycle phase ignoring the gone overlay. A re-centre marks entries
    /// gone without losing the phase, so a re-add can resume where the
    /// client left off.
    pub fn phase(&self) -> CacheState {
        if self.flags & ENTER_PENDING != 0 {
            CacheState::EnterPending
        } else if self.flags & WITHHELD != 0 {
            CacheState::Withheld
        } else if self.flags & REQUEST_PENDING != 0 {
            CacheState::RequestPending
        } else if self.flags & CREATE_PENDING != 0 {
            CacheState::CreatePending
        } else {
            CacheState::Updatable
        }
    }

    /// Moves to a new lifecycle phase, clearing the previous one. The gone
    /// overlay is untouched; use [`set_gone`](Self::set_gone) for it.
    pub fn set_state(&mut self, state: CacheState) {
        if state == CacheState::Gone {
            self.flags |= GONE;
            return;
        }
        self.flags &= !(WITHHELD | ENTER_PENDING | REQUEST_PENDING | CREATE_PENDING);
        self.flags |= match state {
            CacheState::Gone => unreachable!(),
            CacheState::Withheld => WITHHELD,
            CacheState::EnterPending => ENTER_PENDING,
            CacheState::RequestPending => REQUEST_PENDING,
            CacheState::CreatePending => CREATE_PENDING,
            CacheState::Updatable => 0,
        };
    }

    pub fn is_gone(&self) -> bool {
        self.flags & GONE != 0
    }

    pub fn set_gone(&mut self, on: bool) {
        self.set_flag(GONE, on);
    }

    pub fn is_enter_pending(&self) -> bool {
        self.flags & ENTER_PENDING != 0
    }

    pub fn is_manually_added(&self) -> bool {
        self.flags & MANUALLY_ADDED != 0
    }

    pub fn set_manually_added(&mut self, on: bool) {
        self.set_flag(MANUALLY_ADDED, on);
    }

    pub fn is_added_by_trigger(&self) -> bool {
        self.flags & ADDED_BY_TRIGGER != 0
    }

    pub fn set_added_by_trigger(&mut self, on: bool) {
        self.set_flag(ADDED_BY_TRIGGER, on);
    }

    pub fn wants_refresh(&self) -> bool {
        self.flags & REFRESH != 0
    }

    pub fn set_refresh(&mut self, on: bool) {
        self.set_flag(REFRESH, on);
    }

    pub fn is_prioritised(&self) -> bool {
        self.flags & PRIORITISED != 0
    }

    pub fn set_prioritised(&mut self, on: bool) {
        self.set_flag(PRIORITISED, on);
    }

    pub fn is_in_aoi_offload(&self) -> bool {
        self.flags & IN_AOI_OFFLOAD != 0
    }

    pub fn set_in_aoi_offload(&mut self, on: bool) {
        self.set_flag(IN_AOI_OFFLOAD, on);
    }

    pub fn is_always_detailed(&self) -> bool {
        self.flags & ALWAYS_DETAILED != 0
    }

    pub fn set_always_detailed(&mut self, on: bool) {
        self.set_flag(ALWAYS_DETAILED, on);
    }

    fn set_flag(&mut self, flag: u16, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    /// Serializes the full cache state for witness offload.
    pub fn write_to_stream(&self, w: &mut BinaryWriter) {
        w.write_u32(self.id);
        w.write_u8(self.alias);
        w.write_f64(self.priority);
        w.write_u16(self.flags);
        w.write_u32(self.vehicle_snapshot.unwrap_or(0));
        w.write_u32(self.last_event_number);
        w.write_u8(self.lod_events.len() as u8);
        for ev in &self.lod_events {
            w.write_u32(*ev);
        }
    }

    /// Counterpart of [`write_to_stream`](Self::write_to_stream).
    pub fn read_from_stream(r: &mut BinaryReader<'_>) -> Result<Self, WireError> {
        let id = r.read_u32()?;
        let alias = r.read_u8()?;
        let priority = r.read_f64()?;
        let flags = r.read_u16()?;
        let vehicle = r.read_u32()?;
        let last_event_number = r.read_u32()?;
        let levels = r.read_u8()? as usize;
        let mut lod_events = Vec::with_capacity(levels);
        for _ in 0..levels {
            lod_events.push(r.read_u32()?);
        }
        Ok(Self {
            id,
            alias,
            priority,
            flags,
            vehicle_snapshot: if vehicle == 0 { None } else { Some(vehicle) },
            last_event_number,
            lod_events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cache_is_enter_pending() {
        let cache = EntityCache::new(42);
        assert_eq!(cache.state(), CacheState::EnterPending);
        assert_eq!(cache.alias(), NO_ID_ALIAS);
        assert_eq!(cache.priority(), 0.0);
    }

    #[test]
    fn test_state_transitions_are_exclusive() {
        let mut cache = EntityCache::new(1);
        cache.set_state(CacheState::RequestPending);
        assert_eq!(cache.state(), CacheState::RequestPending);
        assert!(!cache.is_enter_pending());

        cache.set_state(CacheState::CreatePending);
        assert_eq!(cache.state(), CacheState::CreatePending);

        cache.set_state(CacheState::Updatable);
        assert_eq!(cache.state(), CacheState::Updatable);
    }

    #[test]
    fn test_gone_overlays_the_phase() {
        let mut cache = EntityCache::new(1);
        cache.set_state(CacheState::Updatable);
        cache.set_gone(true);
        assert_eq!(cache.state(), CacheState::Gone);
        assert_eq!(cache.phase(), CacheState::Updatable);
        cache.set_gone(false);
        assert_eq!(cache.state(), CacheState::Updatable);
    }

    #[test]
    fn test_orthogonal_flags_survive_state_change() {
        let mut cache = EntityCache::new(1);
        cache.set_manually_added(true);
        cache.set_prioritised(true);
        cache.set_state(CacheState::Updatable);
        assert!(cache.is_manually_added());
        assert!(cache.is_prioritised());
    }

    #[test]
    fn test_stream_round_trip() {
        let mut cache = EntityCache::new(77);
        cache.set_alias(12);
        cache.set_priority(123.5);
        cache.set_state(CacheState::Updatable);
        cache.set_added_by_trigger(true);
        cache.vehicle_snapshot = Some(9);
        cache.last_event_number = 31;
        cache.lod_events = vec![31, 12];

        let mut w = BinaryWriter::new();
        cache.write_to_stream(&mut w);
        let bytes = w.into_bytes();
        let mut r = BinaryReader::new(&bytes);
        let back = EntityCache::read_from_stream(&mut r).unwrap();

        assert_eq!(back.id(), 77);
        assert_eq!(back.alias(), 12);
        assert_eq!(back.priority(), 123.5);
        assert_eq!(back.state(), CacheState::Updatable);
        assert!(back.is_added_by_trigger());
        assert_eq!(back.vehicle_snapshot, Some(9));
        assert_eq!(back.last_event_number, 31);
        assert_eq!(back.lod_events, vec![31, 12]);
    }
}
