//! Radius-based AoI membership with hysteresis.
//!
//! A trigger watches the horizontal plane around its root. An entity
//! enters when it comes within `radius` and only leaves again once it
//! moves beyond `radius + hysteresis`, so an entity oscillating on the
//! boundary does not flap in and out of the AoI.

use std::collections::HashSet;

use crate::types::{EntityId, Vec3};
use crate::world::World;

/// What the trigger is centred on.
///
/// A re-centre (teleport preparation, offload) swaps an entity root for a
/// fixed point or vice versa; roots are compared by value, never identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AoiRoot {
    /// Follows this entity's world position.
    Entity(EntityId),
    /// Pinned to a fixed horizontal position.
    Point { x: f32, z: f32 },
}

/// Membership changes produced by one evaluation pass.
#[derive(Debug, Default, PartialEq)]
pub struct TriggerEvents {
    pub entered: Vec<EntityId>,
    pub left: Vec<EntityId>,
}

#[derive(Debug)]
pub struct AoiTrigger {
    root: AoiRoot,
    radius: f32,
    hysteresis: f32,
    inside: HashSet<EntityId>,
}

impl AoiTrigger {
    /// Creates a trigger. Call [`scan`](Self::scan) immediately afterwards
    /// to pick up entities already overlapping the volume.
    pub fn new(root: AoiRoot, radius: f32, hysteresis: f32) -> Self {
        Self {
            root,
            radius,
            hysteresis,
            inside: HashSet::new(),
        }
    }

    pub fn root(&self) -> AoiRoot {
        self.root
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn hysteresis(&self) -> f32 {
        self.hysteresis
    }

    /// Changes the radius in place. Membership is reconciled on the next
    /// scan, with hysteresis applied as usual.
    pub fn set_range(&mut self, radius: f32, hysteresis: f32) {
        self.radius = radius;
        self.hysteresis = hysteresis;
    }

    fn centre(&self, world: &World) -> Option<Vec3> {
        match self.root {
            AoiRoot::Entity(id) => world.world_position(id),
            AoiRoot::Point { x, z } => Some(Vec3::new(x, 0.0, z)),
        }
    }

    /// Distance test with the hysteresis band applied to entities already
    /// inside.
    fn contains(&self, centre: Vec3, position: Vec3, currently_inside: bool) -> bool {
        let threshold = if currently_inside {
            self.radius + self.hysteresis
        } else {
            self.radius
        };
        position.flat_dist_sq(centre) <= threshold * threshold
    }

    /// Whether `id` is eligible to enter through this trigger at all.
    /// The owner never triggers itself, manual-AoI entity types only enter
    /// by explicit request, and destroyed or unrepresentable entities stay
    /// out.
    fn eligible(world: &World, owner: EntityId, id: EntityId) -> bool {
        if id == owner {
            return false;
        }
        match world.get(id) {
            Some(e) => !e.is_destroyed && !e.is_manual_aoi && e.can_be_on_client,
            None => false,
        }
    }

    /// Re-evaluates membership for every world entity, returning the
    /// transitions since the previous scan.
    pub fn scan(&mut self, world: &World, owner: EntityId) -> TriggerEvents {
        let mut events = TriggerEvents::default();
        let Some(centre) = self.centre(world) else {
            // Rootless trigger (owner despawned): everyone leaves.
            events.left = self.inside.drain().collect();
            return events;
        };

        for id in world.ids() {
            let currently_inside = self.inside.contains(&id);
            // Large entities are admitted from any distance.
            let is_large = world.get(id).map(|e| e.is_large).unwrap_or(false);
            let now_inside = Self::eligible(world, owner, id)
                && (is_large
                    || world
                        .world_position(id)
                        .map(|p| self.contains(centre, p, currently_inside))
                        .unwrap_or(false));

            match (currently_inside, now_inside) {
                (false, true) => {
                    self.inside.insert(id);
                    events.entered.push(id);
                }
                (true, false) => {
                    self.inside.remove(&id);
                    events.left.push(id);
                }
                _ => {}
            }
        }

        // Entities removed from the world while inside.
        let vanished: Vec<EntityId> = self
            .inside
            .iter()
            .filter(|id| !world.contains(**id))
            .copied()
            .collect();
        for id in vanished {
            self.inside.remove(&id);
            events.left.push(id);
        }

        events
    }

    /// Forgets an entity without emitting a leave. Used when a cache is
    /// torn down through a path that already told the client.
    pub fn forget(&mut self, id: EntityId) {
        self.inside.remove(&id);
    }

    pub fn is_inside(&self, id: EntityId) -> bool {
        self.inside.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Entity;

    fn world_with(owner: EntityId, entities: &[(EntityId, f32, f32)]) -> World {
        let mut world = World::new();
        world.insert(Entity::new(owner, 0, Vec3::default()));
        for (id, x, z) in entities {
            world.insert(Entity::new(*id, 0, Vec3::new(*x, 0.0, *z)));
        }
        world
    }

    #[test]
    fn test_enter_at_400_not_at_600() {
        let world = world_with(1, &[(2, 400.0, 0.0), (3, 600.0, 0.0)]);
        let mut trigger = AoiTrigger::new(AoiRoot::Entity(1), 500.0, 5.0);
        let events = trigger.scan(&world, 1);
        assert_eq!(events.entered, vec![2]);
        assert!(events.left.is_empty());
        assert!(trigger.is_inside(2));
        assert!(!trigger.is_inside(3));
    }

    #[test]
    fn test_owner_never_enters() {
        let world = world_with(1, &[]);
        let mut trigger = AoiTrigger::new(AoiRoot::Entity(1), 500.0, 5.0);
        assert!(trigger.scan(&world, 1).entered.is_empty());
    }

    #[test]
    fn test_hysteresis_band() {
        let mut world = world_with(1, &[(2, 499.0, 0.0)]);
        let mut trigger = AoiTrigger::new(AoiRoot::Entity(1), 500.0, 10.0);
        assert_eq!(trigger.scan(&world, 1).entered, vec![2]);

        // Drifts past the radius but inside the band: stays.
        world.get_mut(2).unwrap().position = Vec3::new(505.0, 0.0, 0.0);
        let events = trigger.scan(&world, 1);
        assert!(events.left.is_empty());

        // Past the band: leaves.
        world.get_mut(2).unwrap().position = Vec3::new(511.0, 0.0, 0.0);
        assert_eq!(trigger.scan(&world, 1).left, vec![2]);

        // Coming back in requires crossing the inner radius again.
        world.get_mut(2).unwrap().position = Vec3::new(505.0, 0.0, 0.0);
        assert!(trigger.scan(&world, 1).entered.is_empty());
    }

    #[test]
    fn test_manual_aoi_types_excluded() {
        let mut world = world_with(1, &[(2, 10.0, 0.0)]);
        world.get_mut(2).unwrap().is_manual_aoi = true;
        let mut trigger = AoiTrigger::new(AoiRoot::Entity(1), 500.0, 5.0);
        assert!(trigger.scan(&world, 1).entered.is_empty());
    }

    #[test]
    fn test_point_root() {
        let world = world_with(1, &[(2, 1000.0, 0.0)]);
        let mut trigger = AoiTrigger::new(AoiRoot::Point { x: 990.0, z: 0.0 }, 50.0, 5.0);
        assert_eq!(trigger.scan(&world, 1).entered, vec![2]);
    }

    #[test]
    fn test_vanished_entity_leaves() {
        let mut world = world_with(1, &[(2, 10.0, 0.0)]);
        let mut trigger = AoiTrigger::new(AoiRoot::Entity(1), 500.0, 5.0);
        trigger.scan(&world, 1);
        world.remove(2);
        assert_eq!(trigger.scan(&world, 1).left, vec![2]);
    }
}
