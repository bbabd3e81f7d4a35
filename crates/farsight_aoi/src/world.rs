//! Minimal world model the AoI machinery runs against.
//!
//! The witness only needs a narrow view of an entity: where it is, what it
//! rides, whether its position streams as volatile data, and monotonic
//! change counters for delta updates. Game logic proper lives elsewhere.

use std::collections::HashMap;

use crate::types::{EntityId, EventNumber, Vec3};

/// Property detail levels per entity type, capped so a level always fits
/// a one-byte staleness mask on the wire.
pub const MAX_LOD_LEVELS: u8 = 8;

/// One entity as seen by the AoI subsystem.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub entity_type: u16,
    pub position: Vec3,
    pub direction: Vec3,
    /// The entity this one rides, if any. Chains are acyclic.
    pub vehicle: Option<EntityId>,
    /// Volatile entities stream position every update and are eligible for
    /// one-byte id aliases.
    pub is_volatile: bool,
    /// Entities the client-side cannot represent are withheld from AoI
    /// delivery until this flips.
    pub can_be_on_client: bool,
    /// Manual-AoI entity types never enter through the trigger; a script
    /// must add them explicitly.
    pub is_manual_aoi: bool,
    /// Large entities are visible from anywhere in the space; the trigger
    /// admits them regardless of distance.
    pub is_large: bool,
    /// Property bytes, stand-in for the scripted property set.
    pub properties: Vec<u8>,
    /// Bumped whenever `properties` changes, at any detail level.
    pub event_number: EventNumber,
    /// Change counter per detail level, one entry per level.
    pub lod_event_numbers: Vec<EventNumber>,
    pub is_destroyed: bool,
}

impl Entity {
    pub fn new(id: EntityId, entity_type: u16, position: Vec3) -> Self {
        Self {
            id,
            entity_type,
            position,
            direction: Vec3::default(),
            vehicle: None,
            is_volatile: true,
            can_be_on_client: true,
            is_manual_aoi: false,
            is_large: false,
            properties: Vec::new(),
            event_number: 0,
            lod_event_numbers: vec![0],
            is_destroyed: false,
        }
    }

    /// Number of property detail levels for this entity's type.
    pub fn lod_levels(&self) -> usize {
        self.lod_event_numbers.len()
    }

    /// Resizes the per-level counters. At least one level always exists
    /// and the count caps at [`MAX_LOD_LEVELS`].
    pub fn set_lod_levels(&mut self, levels: u8) {
        let levels = levels.clamp(1, MAX_LOD_LEVELS) as usize;
        self.lod_event_numbers.resize(levels, 0);
    }
}

/// Entity registry plus the queries the witness needs.
#[derive(Debug, Default)]
pub struct World {
    entities: HashMap<EntityId, Entity>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Updates an entity's property bytes at the most detailed level and
    /// bumps its change counters.
    pub fn set_properties(&mut self, id: EntityId, properties: Vec<u8>) {
        self.set_properties_at(id, 0, properties);
    }

    /// Like [`set_properties`](Self::set_properties) but attributes the
    /// change to detail level `level`, clamped to the entity's level count.
    pub fn set_properties_at(&mut self, id: EntityId, level: u8, properties: Vec<u8>) {
        if let Some(e) = self.entities.get_mut(&id) {
            e.properties = properties;
            e.event_number += 1;
            let level = (level as usize).min(e.lod_event_numbers.len() - 1);
            e.lod_event_numbers[level] = e.event_number;
        }
    }

    /// World position of an entity, following its vehicle chain to the
    /// root so passengers report the vehicle's position.
    pub fn world_position(&self, id: EntityId) -> Option<Vec3> {
        let mut current = self.entities.get(&id)?;
        let mut hops = 0;
        while let Some(vehicle_id) = current.vehicle {
            match self.entities.get(&vehicle_id) {
                Some(vehicle) if hops < 16 => {
                    current = vehicle;
                    hops += 1;
                }
                _ => break,
            }
        }
        Some(current.position)
    }

    /// The chain of vehicles under `id`, nearest first, excluding `id`
    /// itself.
    pub fn vehicle_chain(&self, id: EntityId) -> Vec<EntityId> {
        let mut chain = Vec::new();
        let mut current = id;
        while let Some(entity) = self.entities.get(&current) {
            match entity.vehicle {
                Some(vehicle_id) if !chain.contains(&vehicle_id) && vehicle_id != id => {
                    chain.push(vehicle_id);
                    current = vehicle_id;
                }
                _ => break,
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_chain_depth() {
        let mut world = World::new();
        let mut rider = Entity::new(1, 0, Vec3::default());
        rider.vehicle = Some(2);
        let mut horse = Entity::new(2, 0, Vec3::default());
        horse.vehicle = Some(3);
        let barge = Entity::new(3, 0, Vec3::new(50.0, 0.0, 50.0));
        world.insert(rider);
        world.insert(horse);
        world.insert(barge);

        assert_eq!(world.vehicle_chain(1), vec![2, 3]);
        assert_eq!(world.vehicle_chain(3), Vec::<EntityId>::new());
        // Passenger position resolves through the chain root.
        assert_eq!(world.world_position(1), Some(Vec3::new(50.0, 0.0, 50.0)));
    }

    #[test]
    fn test_vehicle_cycle_terminates() {
        let mut world = World::new();
        let mut a = Entity::new(1, 0, Vec3::default());
        a.vehicle = Some(2);
        let mut b = Entity::new(2, 0, Vec3::default());
        b.vehicle = Some(1);
        world.insert(a);
        world.insert(b);
        assert_eq!(world.vehicle_chain(1), vec![2]);
    }
}
