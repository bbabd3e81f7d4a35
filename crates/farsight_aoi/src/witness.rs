//! The per-client witness: decides what one client gets told each tick.
//!
//! A witness owns the client's cache map, the priority queue scheduling
//! updates, the AoI trigger, and the one-byte alias pool for volatile
//! entity ids. Its `update()` produces one downstream [`Bundle`] per game
//! tick, staying within a byte budget and carrying any overshoot forward
//! as a bandwidth deficit.

use farsight_wire::{BinaryReader, BinaryWriter, Bundle, ClientMessage};
use tracing::{debug, warn};

use crate::cache_map::{CacheHandle, EntityCacheMap};
use crate::config::AoiConfig;
use crate::entity_cache::{CacheState, EntityCache};
use crate::error::AoiError;
use crate::events::{notify_entered, notify_left, AoiListener};
use crate::queue::KnownEntityQueue;
use crate::replay::ReplayDataCollector;
use crate::space_data::SpaceDataStore;
use crate::trigger::{AoiRoot, AoiTrigger};
use crate::types::{EntityId, EventNumber, GameTime, IdAlias, Vec3, NO_ID_ALIAS};
use crate::world::{Entity, World, MAX_LOD_LEVELS};

/// Bytes reserved in every packet for the tick-sync framing.
const TICK_SYNC_RESERVE: usize = 2;

/// Smallest radius a witness can be shrunk to.
const MIN_AOI_RADIUS: f32 = 0.1;

pub struct Witness {
    owner: EntityId,
    config: AoiConfig,
    caches: EntityCacheMap,
    queue: KnownEntityQueue,
    trigger: AoiTrigger,
    /// LIFO free stack of volatile-id aliases. `NO_ID_ALIAS` never enters.
    alias_pool: Vec<IdAlias>,
    packet_size: usize,
    bandwidth_deficit: usize,
    tick: GameTime,
    reference_seq: u8,
    reference_pos: Vec3,
    space_data_seq: u32,
    /// Chain of vehicles under the owner as of the previous tick.
    vehicle_stack: Vec<EntityId>,
    /// Messages produced outside the update loop, flushed first next tick.
    immediate: Vec<ClientMessage>,
    listener: Box<dyn AoiListener + Send>,
    replay: Option<ReplayDataCollector>,
}

impl Witness {
    pub fn new(owner: EntityId, config: AoiConfig, listener: Box<dyn AoiListener + Send>) -> Self {
        let trigger = AoiTrigger::new(
            AoiRoot::Entity(owner),
            config.default_radius,
            config.default_hysteresis,
        );
        let packet_size = config.packet_size;
        Self {
            owner,
            config,
            caches: EntityCacheMap::new(),
            queue: KnownEntityQueue::new(),
            trigger,
            alias_pool: (0..NO_ID_ALIAS).collect(),
            packet_size,
            bandwidth_deficit: 0,
            tick: 0,
            reference_seq: 0,
            reference_pos: Vec3::default(),
            space_data_seq: 0,
            vehicle_stack: Vec::new(),
            immediate: Vec::new(),
            listener,
            replay: None,
        }
    }

    pub fn owner(&self) -> EntityId {
        self.owner
    }

    pub fn aoi_size(&self) -> usize {
        self.caches.len()
    }

    pub fn is_in_aoi(&self, id: EntityId) -> bool {
        self.caches.find(id).is_some()
    }

    /// The cache entry for an entity, if it is in the AoI.
    pub fn find_cache(&self, id: EntityId) -> Option<&EntityCache> {
        self.caches.find(id)
    }

    #[cfg(test)]
    pub(crate) fn heap_ok(&self) -> bool {
        self.queue.is_heap(&self.caches)
    }

    pub fn tick(&self) -> GameTime {
        self.tick
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub fn bandwidth_deficit(&self) -> usize {
        self.bandwidth_deficit
    }

    /// Attaches a replay collector mirroring everything sent from now on.
    pub fn set_replay(&mut self, collector: ReplayDataCollector) {
        self.replay = Some(collector);
    }

    pub fn take_replay(&mut self) -> Option<ReplayDataCollector> {
        self.replay.take()
    }

    /// Converts a client bandwidth cap into the per-tick packet budget.
    pub fn set_witness_capacity(&mut self, bps: u32) {
        self.packet_size = self.config.packet_size_for_bps(bps);
    }

    /// Resizes the AoI. The radius is floored at a minimum and, when the
    /// configuration bounds it, clamped to the maximum; membership changes
    /// flow out of the next update's trigger scan.
    pub fn set_aoi_radius(&mut self, radius: f32, hysteresis: f32) {
        let mut radius = radius.max(MIN_AOI_RADIUS);
        if self.config.max_radius > 0.0 {
            radius = radius.min(self.config.max_radius);
        }
        self.trigger.set_range(radius, hysteresis);
    }

    pub fn aoi_radius(&self) -> f32 {
        self.trigger.radius()
    }

    // ---------------------------------------------------------------------
    // Membership
    // ---------------------------------------------------------------------

    /// Adds an entity to the AoI by explicit request. Manual entries
    /// survive trigger exits until removed by the same hand.
    pub fn add_to_manual_aoi(&mut self, world: &World, id: EntityId) -> Result<(), AoiError> {
        if !world.contains(id) {
            return Err(AoiError::NoSuchEntity(id));
        }
        if let Some(cache) = self.caches.find_mut(id) {
            cache.set_manually_added(true);
            if cache.is_gone() {
                cache.set_gone(false);
                cache.set_in_aoi_offload(false);
            }
            return Ok(());
        }
        self.create_cache(world, id, true, false)
    }

    /// Removes a manual entry. The entity stays if the trigger still holds
    /// it.
    pub fn remove_from_manual_aoi(&mut self, id: EntityId) -> Result<(), AoiError> {
        let cache = self.caches.find_mut(id).ok_or(AoiError::NotInAoi(id))?;
        if !cache.is_manually_added() {
            return Err(AoiError::NotInAoi(id));
        }
        cache.set_manually_added(false);
        if !cache.is_added_by_trigger() {
            self.remove_from_aoi(id)?;
        }
        Ok(())
    }

    /// Reconciles the manual set against `ids`: missing ones are added,
    /// stale ones released.
    pub fn update_manual_aoi(&mut self, world: &World, ids: &[EntityId]) -> Result<(), AoiError> {
        let mut stale = Vec::new();
        self.caches.visit(|cache| {
            if cache.is_manually_added() && !ids.contains(&cache.id()) {
                stale.push(cache.id());
            }
        });
        for id in stale {
            self.remove_from_manual_aoi(id)?;
        }
        for id in ids {
            if self
                .caches
                .find(*id)
                .map(|c| !c.is_manually_added())
                .unwrap_or(true)
            {
                self.add_to_manual_aoi(world, *id)?;
            }
        }
        Ok(())
    }

    /// Suppresses or releases an entity already in the AoI. Suppressing an
    /// entity the client knows sends an immediate leave; releasing one
    /// re-enters it from scratch.
    pub fn withhold(&mut self, id: EntityId, withheld: bool) -> Result<(), AoiError> {
        let front = self.queue.front_priority(&self.caches).unwrap_or(0.0);
        let phase = self
            .caches
            .find(id)
            .ok_or(AoiError::NotInAoi(id))?
            .phase();
        if withheld {
            match phase {
                CacheState::Withheld => {}
                CacheState::EnterPending => {
                    if let Some(cache) = self.caches.find_mut(id) {
                        cache.set_state(CacheState::Withheld);
                    }
                }
                _ => {
                    let mut alias = NO_ID_ALIAS;
                    if let Some(cache) = self.caches.find_mut(id) {
                        alias = cache.alias();
                        cache.set_state(CacheState::Withheld);
                        cache.set_alias(NO_ID_ALIAS);
                    }
                    self.release_alias(alias);
                    self.immediate.push(ClientMessage::LeaveAoi { id });
                }
            }
        } else if phase == CacheState::Withheld {
            if let Some(cache) = self.caches.find_mut(id) {
                cache.set_state(CacheState::EnterPending);
                cache.set_priority(front);
            }
            self.reassign_alias(id);
            if let Some(handle) = self.caches.handle_of(id) {
                self.queue.push(handle, &self.caches);
            }
        }
        Ok(())
    }

    pub fn is_withheld(&self, id: EntityId) -> bool {
        self.caches
            .find(id)
            .is_some_and(|c| c.phase() == CacheState::Withheld)
    }

    fn reassign_alias(&mut self, id: EntityId) {
        let alias = self.alias_pool.pop().unwrap_or(NO_ID_ALIAS);
        if let Some(cache) = self.caches.find_mut(id) {
            if cache.alias() == NO_ID_ALIAS {
                cache.set_alias(alias);
                return;
            }
        }
        self.release_alias(alias);
    }

    fn release_alias(&mut self, alias: IdAlias) {
        if alias != NO_ID_ALIAS {
            self.alias_pool.push(alias);
        }
    }

    fn create_cache(
        &mut self,
        world: &World,
        id: EntityId,
        manually: bool,
        by_trigger: bool,
    ) -> Result<(), AoiError> {
        let entity = world.get(id).ok_or(AoiError::NoSuchEntity(id))?;
        let mut cache = EntityCache::new(id);
        if !entity.can_be_on_client {
            cache.set_state(CacheState::Withheld);
        }
        if entity.is_volatile {
            if let Some(alias) = self.alias_pool.pop() {
                cache.set_alias(alias);
            }
        }
        cache.set_manually_added(manually);
        cache.set_added_by_trigger(by_trigger);
        cache.set_priority(self.queue.front_priority(&self.caches).unwrap_or(0.0));
        let queue_it = cache.is_enter_pending();

        let handle = self.caches.add(cache)?;
        if queue_it {
            self.queue.push(handle, &self.caches);
        }
        notify_entered(self.listener.as_mut(), self.owner, id);
        Ok(())
    }

    /// Drops an entity from the AoI, telling the client if it ever knew.
    pub fn remove_from_aoi(&mut self, id: EntityId) -> Result<(), AoiError> {
        let cache = self.caches.find(id).ok_or(AoiError::NotInAoi(id))?;
        let client_aware = matches!(
            cache.phase(),
            CacheState::RequestPending | CacheState::CreatePending | CacheState::Updatable
        );
        let cache = self.caches.del(id)?;
        self.release_alias(cache.alias());
        self.trigger.forget(id);
        if client_aware {
            self.immediate.push(ClientMessage::LeaveAoi { id });
        }
        notify_left(self.listener.as_mut(), self.owner, id);
        Ok(())
    }

    fn on_trigger_enter(&mut self, world: &World, id: EntityId) {
        if let Some(cache) = self.caches.find_mut(id) {
            cache.set_added_by_trigger(true);
            if cache.is_gone() {
                cache.set_gone(false);
                cache.set_in_aoi_offload(false);
            }
            return;
        }
        if let Err(e) = self.create_cache(world, id, false, true) {
            warn!("witness {}: trigger enter for {} failed: {}", self.owner, id, e);
        }
    }

    fn on_trigger_leave(&mut self, id: EntityId) {
        let Some(cache) = self.caches.find_mut(id) else {
            return;
        };
        cache.set_added_by_trigger(false);
        if !cache.is_manually_added() {
            let _ = self.remove_from_aoi(id);
        }
    }

    // ---------------------------------------------------------------------
    // Client acknowledgements
    // ---------------------------------------------------------------------

    /// Handles the client's request for an entity's state after an enter.
    ///
    /// A client that still has the entity cached from an earlier session
    /// passes the change numbers it holds, one per detail level, and
    /// receives deltas only; a fresh client passes `None` and gets a full
    /// create. The stamp list is clamped both ways: entries past the
    /// entity's level count are discarded and each stamp is capped at the
    /// level's actual counter, so a dishonest client can neither oversize
    /// the list nor claim state from the future.
    pub fn request_entity_update(
        &mut self,
        world: &World,
        id: EntityId,
        known_events: Option<&[EventNumber]>,
    ) -> Result<(), AoiError> {
        if id == self.owner {
            return Err(AoiError::SelfRequest);
        }
        let front = self.queue.front_priority(&self.caches).unwrap_or(0.0);
        let current_lods: Vec<EventNumber> = world
            .get(id)
            .map(|e| e.lod_event_numbers.clone())
            .unwrap_or_default();
        let cache = self.caches.find_mut(id).ok_or(AoiError::NotInAoi(id))?;
        if cache.phase() != CacheState::RequestPending {
            return Err(AoiError::NotPending(id));
        }
        match known_events {
            Some(stamps) => {
                cache.set_state(CacheState::Updatable);
                cache.lod_events = current_lods
                    .iter()
                    .enumerate()
                    .map(|(l, current)| stamps.get(l).copied().unwrap_or(0).min(*current))
                    .collect();
                cache.last_event_number = cache.lod_events.iter().copied().max().unwrap_or(0);
            }
            None => cache.set_state(CacheState::CreatePending),
        }
        cache.set_priority(front);
        if let Some(handle) = self.caches.handle_of(id) {
            self.queue.push(handle, &self.caches);
        }
        Ok(())
    }

    /// Streams an entity's position every tick even when it is not
    /// volatile. Used for entities the client is aiming at or spectating.
    pub fn set_position_detailed(&mut self, id: EntityId, on: bool) -> Result<(), AoiError> {
        let cache = self.caches.find_mut(id).ok_or(AoiError::NotInAoi(id))?;
        cache.set_always_detailed(on);
        Ok(())
    }

    /// Forces a full state resend for an entity the client already has.
    pub fn refresh_entity(&mut self, id: EntityId) -> Result<(), AoiError> {
        let cache = self.caches.find_mut(id).ok_or(AoiError::NotInAoi(id))?;
        if cache.phase() == CacheState::Updatable {
            cache.set_refresh(true);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Re-centring
    // ---------------------------------------------------------------------

    /// Re-centres the AoI on a new root by replacing the trigger.
    ///
    /// Entries re-acquired by the new trigger keep their alias and client
    /// state with no traffic at all; the rest leave normally. Re-centring
    /// on the current root is a no-op in terms of events.
    pub fn set_aoi_root(&mut self, world: &World, root: AoiRoot) {
        self.caches.mutate(|cache| {
            if !cache.is_manually_added() {
                cache.set_gone(true);
                cache.set_in_aoi_offload(true);
            }
        });

        self.trigger = AoiTrigger::new(root, self.trigger.radius(), self.trigger.hysteresis());
        let events = self.trigger.scan(world, self.owner);
        for id in events.entered {
            self.on_trigger_enter(world, id);
        }

        self.sweep_offload_leftovers();
    }

    /// Restores the trigger to following the owner entity.
    pub fn clear_aoi_root(&mut self, world: &World) {
        self.set_aoi_root(world, AoiRoot::Entity(self.owner));
    }

    /// Final removal of entries a trigger replacement did not re-acquire.
    fn sweep_offload_leftovers(&mut self) {
        let mut leftovers = Vec::new();
        self.caches.visit(|cache| {
            if cache.is_gone() && cache.is_in_aoi_offload() {
                leftovers.push(cache.id());
            }
        });
        for id in leftovers {
            let _ = self.remove_from_aoi(id);
        }
    }

    // ---------------------------------------------------------------------
    // Offload streaming
    // ---------------------------------------------------------------------

    /// Serializes witness state for migration to another cell application.
    pub fn write_offload_data(&self, w: &mut BinaryWriter) -> Result<(), AoiError> {
        w.write_f32(self.reference_pos.x);
        w.write_f32(self.reference_pos.y);
        w.write_f32(self.reference_pos.z);
        w.write_u8(self.reference_seq);
        w.write_u32(self.tick);
        w.write_u32(self.packet_size as u32);
        w.write_u32(self.bandwidth_deficit as u32);
        w.write_u32(self.space_data_seq);
        w.write_f32(self.trigger.radius());
        w.write_f32(self.trigger.hysteresis());
        self.caches.write_to_stream(w)?;
        Ok(())
    }

    /// Reconstructs a witness from offload data on the receiving cell.
    ///
    /// Offloaded entries are marked gone, the trigger is rebuilt around the
    /// owner, and entries the new cell can still see resume silently; the
    /// rest leave through the normal path.
    pub fn read_offload_data(
        owner: EntityId,
        config: AoiConfig,
        listener: Box<dyn AoiListener + Send>,
        world: &World,
        r: &mut BinaryReader<'_>,
    ) -> Result<Self, AoiError> {
        let mut witness = Self::new(owner, config, listener);
        witness.reference_pos = Vec3::new(r.read_f32()?, r.read_f32()?, r.read_f32()?);
        witness.reference_seq = r.read_u8()?;
        witness.tick = r.read_u32()?;
        witness.packet_size = r.read_u32()? as usize;
        witness.bandwidth_deficit = r.read_u32()? as usize;
        witness.space_data_seq = r.read_u32()?;
        let radius = r.read_f32()?;
        let hysteresis = r.read_f32()?;

        let count = r.read_u32()?;
        for _ in 0..count {
            let mut cache = EntityCache::read_from_stream(r)?;
            if cache.alias() != NO_ID_ALIAS {
                let alias = cache.alias();
                witness.alias_pool.retain(|a| *a != alias);
            }
            cache.set_gone(true);
            cache.set_in_aoi_offload(true);
            let _ = witness.caches.add(cache);
        }

        witness.trigger = AoiTrigger::new(AoiRoot::Entity(owner), radius, hysteresis);
        let events = witness.trigger.scan(world, owner);
        for id in events.entered {
            witness.on_trigger_enter(world, id);
        }
        witness.sweep_offload_leftovers();

        // Survivors rejoin the schedule.
        let ids = witness.caches.ids();
        for id in ids {
            let queue_it = witness
                .caches
                .find(id)
                .map(|c| {
                    matches!(
                        c.phase(),
                        CacheState::EnterPending | CacheState::CreatePending | CacheState::Updatable
                    )
                })
                .unwrap_or(false);
            if queue_it {
                if let Some(handle) = witness.caches.handle_of(id) {
                    witness.queue.push(handle, &witness.caches);
                }
            }
        }
        Ok(witness)
    }

    // ---------------------------------------------------------------------
    // The tick update
    // ---------------------------------------------------------------------

    /// Produces this tick's downstream bundle.
    pub fn update(&mut self, world: &World, space_data: &SpaceDataStore) -> Result<Bundle, AoiError> {
        self.tick = self.tick.wrapping_add(1);
        let mut bundle = Bundle::new();
        if let Some(replay) = &mut self.replay {
            replay.begin_tick(self.tick);
        }
        self.push_msg(
            &mut bundle,
            ClientMessage::TickSync {
                tick: (self.tick & 0xFF) as u8,
            },
        )?;

        // Membership first so this tick reflects current positions.
        let events = self.trigger.scan(world, self.owner);
        for id in events.entered {
            self.on_trigger_enter(world, id);
        }
        for id in events.left {
            self.on_trigger_leave(id);
        }

        // Leaves and other immediates are never budget-capped.
        let immediate: Vec<ClientMessage> = self.immediate.drain(..).collect();
        for msg in immediate {
            self.push_msg(&mut bundle, msg)?;
        }

        self.stream_space_data(world, space_data, &mut bundle)?;
        self.stream_own_position(world, &mut bundle)?;
        self.update_vehicle_stack(world, &mut bundle)?;
        // Vehicle sends defer priorities of entries still sitting in the
        // heap; restore the ordering before draining.
        self.queue.make_heap(&self.caches);
        self.stream_vehicle_changes(world, &mut bundle)?;
        self.drain_queue(world, &mut bundle)?;

        // Overshoot becomes debt, capped at one packet.
        let allowance = self.packet_size.saturating_sub(self.bandwidth_deficit);
        self.bandwidth_deficit = bundle.size().saturating_sub(allowance).min(self.packet_size);

        // Prioritised marks only live for the tick that set them.
        self.caches.mutate(|cache| cache.set_prioritised(false));

        debug_assert!(self.queue.is_heap(&self.caches));
        Ok(bundle)
    }

    fn push_msg(&mut self, bundle: &mut Bundle, msg: ClientMessage) -> Result<(), AoiError> {
        if let Some(replay) = &mut self.replay {
            replay.record(&msg);
        }
        bundle.push(msg)?;
        Ok(())
    }

    fn stream_space_data(
        &mut self,
        _world: &World,
        space_data: &SpaceDataStore,
        bundle: &mut Bundle,
    ) -> Result<(), AoiError> {
        let entries: Vec<ClientMessage> = space_data
            .since(self.space_data_seq)
            .map(|e| ClientMessage::SpaceData {
                space_id: e.space_id,
                key: e.key,
                data: e.data.clone(),
            })
            .collect();
        for msg in entries {
            self.push_msg(bundle, msg)?;
        }
        self.space_data_seq = space_data.latest_seq();
        Ok(())
    }

    /// Sends the player's own position, re-anchoring the relative
    /// reference when the player moves under its own volatile stream.
    fn stream_own_position(&mut self, world: &World, bundle: &mut Bundle) -> Result<(), AoiError> {
        let Some(owner) = world.get(self.owner) else {
            return Ok(());
        };
        if owner.is_volatile && owner.vehicle.is_none() {
            self.reference_seq = self.reference_seq.wrapping_add(1);
            self.reference_pos = owner.position;
            let seq = self.reference_seq;
            self.push_msg(bundle, ClientMessage::RelativePositionReference { seq })?;
        } else {
            let pos = world.world_position(self.owner).unwrap_or(owner.position);
            let msg = ClientMessage::PlayerDetailedPosition {
                pos: pos.to_array(),
                dir: owner.direction.to_array(),
            };
            self.push_msg(bundle, ClientMessage::SelectPlayerEntity)?;
            self.push_msg(bundle, msg)?;
        }
        Ok(())
    }

    /// Entities the owner is riding always update first and outside the
    /// budget: a client that cannot place the vehicle cannot place the
    /// player either.
    fn update_vehicle_stack(&mut self, world: &World, bundle: &mut Bundle) -> Result<(), AoiError> {
        let chain = world.vehicle_chain(self.owner);

        // Release vehicles no longer under the owner.
        let released: Vec<EntityId> = self
            .vehicle_stack
            .iter()
            .filter(|id| !chain.contains(id))
            .copied()
            .collect();
        for id in released {
            if let Some(cache) = self.caches.find_mut(id) {
                cache.set_manually_added(false);
                if !cache.is_added_by_trigger() {
                    let _ = self.remove_from_aoi(id);
                }
            }
        }

        for vid in &chain {
            if self.caches.find(*vid).is_none() {
                // Vehicle outside the trigger: pin it manually while
                // ridden.
                if let Err(e) = self.create_cache(world, *vid, true, false) {
                    warn!("witness {}: vehicle {} not cacheable: {}", self.owner, vid, e);
                    continue;
                }
            } else if let Some(cache) = self.caches.find_mut(*vid) {
                cache.set_manually_added(true);
            }

            if let Some(cache) = self.caches.find_mut(*vid) {
                cache.set_prioritised(true);
            }
            if self
                .caches
                .find(*vid)
                .map(|c| c.phase() == CacheState::Updatable)
                .unwrap_or(false)
            {
                self.send_entity_update(world, *vid, bundle)?;
                self.defer_cache(world, *vid);
            }
        }

        self.vehicle_stack = chain;
        Ok(())
    }

    /// Tells the client about passenger/vehicle relationship changes for
    /// entities it has created.
    fn stream_vehicle_changes(&mut self, world: &World, bundle: &mut Bundle) -> Result<(), AoiError> {
        let mut changes = Vec::new();
        self.caches.visit(|cache| {
            if cache.phase() != CacheState::Updatable || cache.is_gone() {
                return;
            }
            let current = world.get(cache.id()).and_then(|e| e.vehicle);
            if current != cache.vehicle_snapshot {
                changes.push((cache.id(), current));
            }
        });
        for (id, vehicle) in changes {
            self.push_msg(
                bundle,
                ClientMessage::SetVehicle {
                    passenger: id,
                    vehicle: vehicle.unwrap_or(0),
                },
            )?;
            if let Some(cache) = self.caches.find_mut(id) {
                cache.vehicle_snapshot = vehicle;
            }
        }
        Ok(())
    }

    /// Drains the priority queue within the byte budget and the per-tick
    /// priority spread.
    fn drain_queue(&mut self, world: &World, bundle: &mut Bundle) -> Result<(), AoiError> {
        let allowance = self.packet_size.saturating_sub(self.bandwidth_deficit);
        let Some(front_priority) = self.queue.front_priority(&self.caches) else {
            return Ok(());
        };
        let mut requeue: Vec<CacheHandle> = Vec::new();

        loop {
            if bundle.size() + TICK_SYNC_RESERVE >= allowance {
                break;
            }
            let Some(handle) = self.queue.pop(&self.caches) else {
                break;
            };
            let Some(cache) = self.caches.resolve(handle) else {
                continue;
            };
            if cache.is_gone() {
                // Re-centre leftovers are swept synchronously; a gone entry
                // here is mid-replacement and simply drops off the
                // schedule.
                continue;
            }
            if cache.priority() - front_priority > self.config.max_priority_delta {
                requeue.push(handle);
                break;
            }
            if cache.is_prioritised() && cache.phase() == CacheState::Updatable {
                // Already serviced through the vehicle stack this tick.
                requeue.push(handle);
                continue;
            }

            let id = cache.id();
            match cache.phase() {
                CacheState::EnterPending => {
                    self.send_enter(world, id, bundle)?;
                }
                CacheState::CreatePending => {
                    self.send_create(world, id, bundle)?;
                    self.defer_cache(world, id);
                    requeue.push(handle);
                }
                CacheState::Updatable => {
                    self.send_entity_update(world, id, bundle)?;
                    self.defer_cache(world, id);
                    requeue.push(handle);
                }
                // Request-pending waits for the client; withheld waits for
                // script. Neither stays scheduled.
                CacheState::RequestPending | CacheState::Withheld | CacheState::Gone => {}
            }
        }

        // Entries popped but not sent never fall below the front they were
        // measured against, otherwise a starved entry could leapfrog the
        // whole queue next tick.
        for handle in &requeue {
            if let Some(cache) = self.caches.resolve_mut(*handle) {
                if cache.priority() < front_priority {
                    cache.set_priority(front_priority);
                }
            }
        }
        for handle in requeue {
            self.queue.push(handle, &self.caches);
        }
        Ok(())
    }

    fn send_enter(&mut self, world: &World, id: EntityId, bundle: &mut Bundle) -> Result<(), AoiError> {
        let vehicle = world.get(id).and_then(|e| e.vehicle);
        let Some(cache) = self.caches.find_mut(id) else {
            return Ok(());
        };
        let alias = cache.alias();
        cache.set_state(CacheState::RequestPending);
        cache.vehicle_snapshot = vehicle;
        let msg = match vehicle {
            Some(vehicle) => ClientMessage::EnterAoiOnVehicle { id, vehicle, alias },
            None => ClientMessage::EnterAoi { id, alias },
        };
        self.push_msg(bundle, msg)
    }

    fn send_create(&mut self, world: &World, id: EntityId, bundle: &mut Bundle) -> Result<(), AoiError> {
        let Some(entity) = world.get(id) else {
            let _ = self.remove_from_aoi(id);
            return Ok(());
        };
        let msg = ClientMessage::CreateEntity {
            id,
            entity_type: entity.entity_type,
            pos: entity.position.to_array(),
            dir: entity.direction.to_array(),
            properties: entity.properties.clone(),
        };
        let event_number = entity.event_number;
        let lod_events = entity.lod_event_numbers.clone();
        let vehicle = entity.vehicle;
        if let Some(cache) = self.caches.find_mut(id) {
            cache.set_state(CacheState::Updatable);
            cache.last_event_number = event_number;
            cache.lod_events = lod_events;
            cache.vehicle_snapshot = vehicle;
        }
        self.push_msg(bundle, msg)
    }

    fn send_entity_update(
        &mut self,
        world: &World,
        id: EntityId,
        bundle: &mut Bundle,
    ) -> Result<(), AoiError> {
        let Some(entity) = world.get(id) else {
            let _ = self.remove_from_aoi(id);
            return Ok(());
        };
        let Some(cache) = self.caches.find(id) else {
            return Ok(());
        };

        if cache.wants_refresh() {
            let event_number = entity.event_number;
            let lod_events = entity.lod_event_numbers.clone();
            let msg = ClientMessage::CreateEntity {
                id,
                entity_type: entity.entity_type,
                pos: entity.position.to_array(),
                dir: entity.direction.to_array(),
                properties: entity.properties.clone(),
            };
            if let Some(cache) = self.caches.find_mut(id) {
                cache.set_refresh(false);
                cache.last_event_number = event_number;
                cache.lod_events = lod_events;
            }
            return self.push_msg(bundle, msg);
        }

        let payload = Self::update_payload(entity, cache);
        if payload.is_empty() {
            return Ok(());
        }
        let alias = cache.alias();
        let event_number = entity.event_number;
        let lod_events = entity.lod_event_numbers.clone();
        if let Some(cache) = self.caches.find_mut(id) {
            cache.last_event_number = event_number;
            cache.lod_events = lod_events;
        }
        self.push_msg(bundle, ClientMessage::EntityUpdate { id, alias, payload })
    }

    /// Delta payload: a staleness mask and the properties if any detail
    /// level changed, then the streamed position.
    fn update_payload(entity: &Entity, cache: &EntityCache) -> Vec<u8> {
        let mut w = BinaryWriter::new();
        let mut stale_mask: u8 = 0;
        let levels = entity.lod_event_numbers.iter().take(MAX_LOD_LEVELS as usize);
        for (level, current) in levels.enumerate() {
            let held = cache.lod_events.get(level).copied().unwrap_or(0);
            if *current > held {
                stale_mask |= 1 << level;
            }
        }
        let send_pos = entity.is_volatile || cache.is_always_detailed();
        if stale_mask == 0 && !send_pos {
            return Vec::new();
        }
        w.write_u8(stale_mask);
        if stale_mask != 0 {
            w.write_blob(&entity.properties);
        }
        w.write_u8(send_pos as u8);
        if send_pos {
            for v in entity.position.to_array() {
                w.write_f32(v);
            }
        }
        w.into_bytes()
    }

    /// Pushes an entry's next send out by its distance-scaled delta.
    fn defer_cache(&mut self, world: &World, id: EntityId) {
        let delta = self.priority_delta(world, id);
        if let Some(cache) = self.caches.find_mut(id) {
            cache.defer(delta);
        }
    }

    /// Nearby entities update often, distant ones rarely.
    fn priority_delta(&self, world: &World, id: EntityId) -> f64 {
        let dist = match (
            world.world_position(self.owner),
            world.world_position(id),
        ) {
            (Some(a), Some(b)) => a.flat_dist(b),
            _ => self.trigger.radius(),
        };
        1.0 + (dist as f64) / 5.0
    }

    /// Logs the full AoI contents at debug level.
    pub fn dump_aoi(&self) {
        debug!("witness {} AoI ({} entries):", self.owner, self.caches.len());
        self.caches.visit(|cache| {
            debug!(
                "  entity {} alias {} priority {:.2} state {:?}{}{}",
                cache.id(),
                cache.alias(),
                cache.priority(),
                cache.state(),
                if cache.is_manually_added() { " manual" } else { "" },
                if cache.is_added_by_trigger() { " trigger" } else { "" },
            );
        });
    }
}
