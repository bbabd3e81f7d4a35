//! End-to-end witness scenarios.

use std::sync::{Arc, Mutex};

use farsight_wire::{BinaryReader, BinaryWriter, ClientMessage, NO_ID_ALIAS};

use crate::config::AoiConfig;
use crate::events::AoiListener;
use crate::replay::ReplayDataCollector;
use crate::space_data::SpaceDataStore;
use crate::trigger::AoiRoot;
use crate::types::{EntityId, Vec3};
use crate::witness::Witness;
use crate::world::{Entity, World};

#[derive(Default)]
struct Recorded {
    entered: Vec<EntityId>,
    left: Vec<EntityId>,
}

#[derive(Clone, Default)]
struct RecordingListener {
    log: Arc<Mutex<Recorded>>,
}

impl AoiListener for RecordingListener {
    fn on_entered_aoi(&mut self, _owner: EntityId, entity: EntityId) {
        self.log.lock().unwrap().entered.push(entity);
    }

    fn on_left_aoi(&mut self, _owner: EntityId, entity: EntityId) {
        self.log.lock().unwrap().left.push(entity);
    }
}

fn basic_world(owner: EntityId) -> World {
    let mut world = World::new();
    world.insert(Entity::new(owner, 1, Vec3::default()));
    world
}

fn witness_with_listener(owner: EntityId) -> (Witness, Arc<Mutex<Recorded>>) {
    let listener = RecordingListener::default();
    let log = listener.log.clone();
    let witness = Witness::new(owner, AoiConfig::default(), Box::new(listener));
    (witness, log)
}

fn messages_for(bundle: &farsight_wire::Bundle, id: EntityId) -> Vec<ClientMessage> {
    bundle
        .messages()
        .iter()
        .filter(|m| {
            matches!(m,
                ClientMessage::EnterAoi { id: i, .. }
                | ClientMessage::EnterAoiOnVehicle { id: i, .. }
                | ClientMessage::LeaveAoi { id: i }
                | ClientMessage::CreateEntity { id: i, .. }
                | ClientMessage::EntityUpdate { id: i, .. } if *i == id)
        })
        .cloned()
        .collect()
}

#[test]
fn test_enter_within_radius_only() {
    let mut world = basic_world(1);
    world.insert(Entity::new(2, 1, Vec3::new(400.0, 0.0, 0.0)));
    world.insert(Entity::new(3, 1, Vec3::new(600.0, 0.0, 0.0)));
    let (mut witness, log) = witness_with_listener(1);
    let space = SpaceDataStore::new();

    let bundle = witness.update(&world, &space).unwrap();
    assert_eq!(messages_for(&bundle, 2).len(), 1);
    assert!(matches!(
        messages_for(&bundle, 2)[0],
        ClientMessage::EnterAoi { id: 2, .. }
    ));
    assert!(messages_for(&bundle, 3).is_empty());
    assert_eq!(log.lock().unwrap().entered, vec![2]);
    assert!(witness.heap_ok());
}

#[test]
fn test_full_lifecycle_enter_request_create_update() {
    let mut world = basic_world(1);
    world.insert(Entity::new(2, 7, Vec3::new(10.0, 0.0, 0.0)));
    let (mut witness, _log) = witness_with_listener(1);
    let space = SpaceDataStore::new();

    let bundle = witness.update(&world, &space).unwrap();
    assert!(matches!(
        messages_for(&bundle, 2)[0],
        ClientMessage::EnterAoi { id: 2, .. }
    ));

    // Nothing more for the entity until the client asks.
    let bundle = witness.update(&world, &space).unwrap();
    assert!(messages_for(&bundle, 2).is_empty());

    witness.request_entity_update(&world, 2, None).unwrap();
    let bundle = witness.update(&world, &space).unwrap();
    assert!(matches!(
        messages_for(&bundle, 2)[0],
        ClientMessage::CreateEntity { id: 2, entity_type: 7, .. }
    ));

    // Volatile entity streams position every tick once created.
    let bundle = witness.update(&world, &space).unwrap();
    assert!(matches!(
        messages_for(&bundle, 2)[0],
        ClientMessage::EntityUpdate { id: 2, .. }
    ));

    // A property change rides along in the next update.
    world.set_properties(2, vec![9, 9]);
    let bundle = witness.update(&world, &space).unwrap();
    match &messages_for(&bundle, 2)[0] {
        ClientMessage::EntityUpdate { payload, .. } => assert!(!payload.is_empty()),
        other => panic!("expected update, got {:?}", other),
    }
}

#[test]
fn test_lod_stamps_clamped_from_client() {
    let mut world = basic_world(1);
    let mut statue = Entity::new(2, 4, Vec3::new(10.0, 0.0, 0.0));
    statue.is_volatile = false;
    statue.set_lod_levels(2);
    world.insert(statue);
    let (mut witness, _log) = witness_with_listener(1);
    let space = SpaceDataStore::new();

    witness.update(&world, &space).unwrap();
    // The client claims four levels of state from the future; only two
    // levels exist and neither has changed yet.
    witness
        .request_entity_update(&world, 2, Some(&[999, 999, 999, 999]))
        .unwrap();
    let cache = witness.find_cache(2).unwrap();
    assert_eq!(cache.lod_events, vec![0, 0]);

    // Claimed state was honoured, so a quiet tick stays quiet.
    let bundle = witness.update(&world, &space).unwrap();
    assert!(messages_for(&bundle, 2).is_empty());

    // A change at the second detail level flags exactly that level.
    world.set_properties_at(2, 1, vec![7]);
    let bundle = witness.update(&world, &space).unwrap();
    match &messages_for(&bundle, 2)[0] {
        ClientMessage::EntityUpdate { payload, .. } => assert_eq!(payload[0], 0b10),
        other => panic!("expected update, got {:?}", other),
    }
}

#[test]
fn test_large_entities_enter_from_any_distance() {
    let mut world = basic_world(1);
    let mut mothership = Entity::new(2, 9, Vec3::new(5000.0, 0.0, 0.0));
    mothership.is_large = true;
    world.insert(mothership);
    world.insert(Entity::new(3, 1, Vec3::new(5000.0, 0.0, 0.0)));
    let (mut witness, log) = witness_with_listener(1);
    let space = SpaceDataStore::new();

    let bundle = witness.update(&world, &space).unwrap();
    assert!(matches!(
        messages_for(&bundle, 2)[0],
        ClientMessage::EnterAoi { id: 2, .. }
    ));
    assert!(messages_for(&bundle, 3).is_empty());
    assert_eq!(log.lock().unwrap().entered, vec![2]);
}

#[test]
fn test_request_update_rejections() {
    let mut world = basic_world(1);
    world.insert(Entity::new(2, 1, Vec3::new(10.0, 0.0, 0.0)));
    let (mut witness, _log) = witness_with_listener(1);
    let space = SpaceDataStore::new();

    assert!(witness.request_entity_update(&world, 1, None).is_err());
    // Not entered yet.
    assert!(witness.request_entity_update(&world, 2, None).is_err());

    witness.update(&world, &space).unwrap();
    witness.request_entity_update(&world, 2, None).unwrap();
    // Double request is rejected.
    assert!(witness.request_entity_update(&world, 2, None).is_err());
}

#[test]
fn test_alias_unique_and_recycled_lifo() {
    let mut world = basic_world(1);
    for id in 2..=5u32 {
        world.insert(Entity::new(id, 1, Vec3::new(id as f32, 0.0, 0.0)));
    }
    let (mut witness, _log) = witness_with_listener(1);
    let space = SpaceDataStore::new();
    witness.update(&world, &space).unwrap();

    let mut aliases: Vec<u8> = (2..=5u32)
        .map(|id| witness.find_cache(id).unwrap().alias())
        .collect();
    assert!(aliases.iter().all(|a| *a != NO_ID_ALIAS));
    let before = aliases.clone();
    aliases.sort_unstable();
    aliases.dedup();
    assert_eq!(aliases.len(), 4, "aliases must be unique");

    // Entity 3 leaves; its alias is recycled to the next entrant.
    let freed = before[1];
    world.get_mut(3).unwrap().position = Vec3::new(10_000.0, 0.0, 0.0);
    witness.update(&world, &space).unwrap();
    assert!(!witness.is_in_aoi(3));

    world.insert(Entity::new(6, 1, Vec3::new(20.0, 0.0, 0.0)));
    witness.update(&world, &space).unwrap();
    assert_eq!(witness.find_cache(6).unwrap().alias(), freed);
}

#[test]
fn test_non_volatile_entities_get_no_alias() {
    let mut world = basic_world(1);
    let mut e = Entity::new(2, 1, Vec3::new(5.0, 0.0, 0.0));
    e.is_volatile = false;
    world.insert(e);
    let (mut witness, _log) = witness_with_listener(1);
    witness.update(&world, &SpaceDataStore::new()).unwrap();
    assert_eq!(witness.find_cache(2).unwrap().alias(), NO_ID_ALIAS);
}

#[test]
fn test_recentre_is_idempotent() {
    let mut world = basic_world(1);
    world.insert(Entity::new(2, 1, Vec3::new(50.0, 0.0, 0.0)));
    world.insert(Entity::new(3, 1, Vec3::new(80.0, 0.0, 0.0)));
    let (mut witness, log) = witness_with_listener(1);
    let space = SpaceDataStore::new();
    witness.update(&world, &space).unwrap();
    assert_eq!(witness.aoi_size(), 2);

    let point = AoiRoot::Point { x: 0.0, z: 0.0 };
    witness.set_aoi_root(&world, point);
    witness.set_aoi_root(&world, point);

    let recorded = log.lock().unwrap();
    // Both entities entered exactly once and nothing ever left.
    assert_eq!(recorded.entered.len(), 2);
    assert!(recorded.left.is_empty());
    drop(recorded);
    assert_eq!(witness.aoi_size(), 2);

    // No leave traffic on the next tick either.
    let bundle = witness.update(&world, &space).unwrap();
    assert!(!bundle
        .messages()
        .iter()
        .any(|m| matches!(m, ClientMessage::LeaveAoi { .. })));
}

#[test]
fn test_recentre_drops_out_of_range_entries() {
    let mut world = basic_world(1);
    world.insert(Entity::new(2, 1, Vec3::new(50.0, 0.0, 0.0)));
    let (mut witness, log) = witness_with_listener(1);
    witness.update(&world, &SpaceDataStore::new()).unwrap();
    assert!(witness.is_in_aoi(2));

    witness.set_aoi_root(
        &world,
        AoiRoot::Point {
            x: 10_000.0,
            z: 0.0,
        },
    );
    assert!(!witness.is_in_aoi(2));
    assert_eq!(log.lock().unwrap().left, vec![2]);
}

#[test]
fn test_vehicle_stack_updates_first() {
    let mut world = basic_world(1);
    let mut rider = world.remove(1).unwrap();
    rider.vehicle = Some(10);
    world.insert(rider);
    let mut horse = Entity::new(10, 2, Vec3::default());
    horse.vehicle = Some(11);
    world.insert(horse);
    let mut wagon = Entity::new(11, 3, Vec3::default());
    wagon.vehicle = Some(12);
    world.insert(wagon);
    world.insert(Entity::new(12, 3, Vec3::default()));
    // A bystander competing for bandwidth.
    world.insert(Entity::new(2, 1, Vec3::new(5.0, 0.0, 0.0)));

    let (mut witness, _log) = witness_with_listener(1);
    let space = SpaceDataStore::new();
    witness.update(&world, &space).unwrap();
    for id in [10u32, 11, 12, 2] {
        let known = witness.find_cache(id).map(|c| c.phase());
        assert!(known.is_some(), "entity {} should be tracked", id);
        witness.request_entity_update(&world, id, None).unwrap();
    }
    witness.update(&world, &space).unwrap();

    // Established AoI: vehicle updates must precede everything for other
    // entities.
    let bundle = witness.update(&world, &space).unwrap();
    let order: Vec<EntityId> = bundle
        .messages()
        .iter()
        .filter_map(|m| match m {
            ClientMessage::EntityUpdate { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    let pos_10 = order.iter().position(|id| *id == 10);
    let pos_11 = order.iter().position(|id| *id == 11);
    let pos_12 = order.iter().position(|id| *id == 12);
    let pos_2 = order.iter().position(|id| *id == 2);
    assert!(pos_10.is_some() && pos_11.is_some() && pos_12.is_some());
    if let Some(p2) = pos_2 {
        assert!(pos_10.unwrap() < p2);
        assert!(pos_11.unwrap() < p2);
        assert!(pos_12.unwrap() < p2);
    }
}

#[test]
fn test_bandwidth_deficit_carries_forward() {
    let mut config = AoiConfig::default();
    config.packet_size = 400;
    let mut world = basic_world(1);
    let mut heavy = Entity::new(2, 1, Vec3::new(5.0, 0.0, 0.0));
    // Properties travel deflate-compressed, so the payload must be
    // incompressible for the create to actually overflow the budget.
    let mut seed = 0x5A5A_5A5Au32;
    heavy.properties = (0..2000)
        .map(|_| {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            (seed >> 24) as u8
        })
        .collect();
    world.insert(heavy);

    let listener = RecordingListener::default();
    let mut witness = Witness::new(1, config, Box::new(listener));
    let space = SpaceDataStore::new();

    witness.update(&world, &space).unwrap();
    witness.request_entity_update(&world, 2, None).unwrap();

    // The create blows through the 400-byte budget.
    let bundle = witness.update(&world, &space).unwrap();
    assert!(bundle.size() > 400);
    let deficit = witness.bandwidth_deficit();
    assert!(deficit > 0);
    assert!(deficit <= witness.packet_size(), "deficit caps at one packet");
}

#[test]
fn test_withhold_round_trip() {
    let mut world = basic_world(1);
    world.insert(Entity::new(2, 1, Vec3::new(5.0, 0.0, 0.0)));
    let (mut witness, _log) = witness_with_listener(1);
    let space = SpaceDataStore::new();

    witness.update(&world, &space).unwrap();
    witness.request_entity_update(&world, 2, None).unwrap();
    witness.update(&world, &space).unwrap();

    // Suppression sends a leave for a created entity.
    witness.withhold(2, true).unwrap();
    assert!(witness.is_withheld(2));
    let bundle = witness.update(&world, &space).unwrap();
    assert!(matches!(
        messages_for(&bundle, 2)[0],
        ClientMessage::LeaveAoi { id: 2 }
    ));

    // Release re-enters from scratch.
    witness.withhold(2, false).unwrap();
    assert!(!witness.is_withheld(2));
    let bundle = witness.update(&world, &space).unwrap();
    assert!(matches!(
        messages_for(&bundle, 2)[0],
        ClientMessage::EnterAoi { id: 2, .. }
    ));
}

#[test]
fn test_manual_aoi_survives_trigger_exit() {
    let mut world = basic_world(1);
    world.insert(Entity::new(2, 1, Vec3::new(5.0, 0.0, 0.0)));
    let (mut witness, log) = witness_with_listener(1);
    let space = SpaceDataStore::new();
    witness.update(&world, &space).unwrap();

    witness.add_to_manual_aoi(&world, 2).unwrap();
    world.get_mut(2).unwrap().position = Vec3::new(10_000.0, 0.0, 0.0);
    witness.update(&world, &space).unwrap();
    assert!(witness.is_in_aoi(2), "manual entries outlive the trigger");

    witness.remove_from_manual_aoi(2).unwrap();
    assert!(!witness.is_in_aoi(2));
    assert_eq!(log.lock().unwrap().left, vec![2]);
}

#[test]
fn test_manual_aoi_entity_types_enter_only_by_request() {
    let mut world = basic_world(1);
    let mut npc = Entity::new(2, 1, Vec3::new(5.0, 0.0, 0.0));
    npc.is_manual_aoi = true;
    world.insert(npc);
    let (mut witness, _log) = witness_with_listener(1);
    let space = SpaceDataStore::new();

    witness.update(&world, &space).unwrap();
    assert!(!witness.is_in_aoi(2));

    witness.add_to_manual_aoi(&world, 2).unwrap();
    assert!(witness.is_in_aoi(2));
}

#[test]
fn test_space_data_streams_once() {
    let world = basic_world(1);
    let (mut witness, _log) = witness_with_listener(1);
    let mut space = SpaceDataStore::new();
    space.add(1, 4, vec![1, 2]);

    let bundle = witness.update(&world, &space).unwrap();
    let count = bundle
        .messages()
        .iter()
        .filter(|m| matches!(m, ClientMessage::SpaceData { .. }))
        .count();
    assert_eq!(count, 1);

    let bundle = witness.update(&world, &space).unwrap();
    assert!(!bundle
        .messages()
        .iter()
        .any(|m| matches!(m, ClientMessage::SpaceData { .. })));

    space.add(1, 5, vec![3]);
    let bundle = witness.update(&world, &space).unwrap();
    assert!(bundle
        .messages()
        .iter()
        .any(|m| matches!(m, ClientMessage::SpaceData { key: 5, .. })));
}

#[test]
fn test_offload_round_trip_keeps_survivors_silent() {
    let mut world = basic_world(1);
    world.insert(Entity::new(2, 1, Vec3::new(50.0, 0.0, 0.0)));
    world.insert(Entity::new(3, 1, Vec3::new(80.0, 0.0, 0.0)));
    let (mut witness, _log) = witness_with_listener(1);
    let space = SpaceDataStore::new();
    witness.update(&world, &space).unwrap();
    witness.request_entity_update(&world, 2, None).unwrap();
    witness.update(&world, &space).unwrap();
    let alias_2 = witness.find_cache(2).unwrap().alias();

    let mut w = BinaryWriter::new();
    witness.write_offload_data(&mut w).unwrap();
    let bytes = w.into_bytes();

    // Entity 3 does not exist on the destination cell.
    world.remove(3);
    let listener = RecordingListener::default();
    let log = listener.log.clone();
    let mut r = BinaryReader::new(&bytes);
    let mut onloaded = Witness::read_offload_data(
        1,
        AoiConfig::default(),
        Box::new(listener),
        &world,
        &mut r,
    )
    .unwrap();

    assert!(onloaded.is_in_aoi(2));
    assert!(!onloaded.is_in_aoi(3));
    assert_eq!(log.lock().unwrap().left, vec![3]);
    // Survivor kept its alias and client-side state.
    assert_eq!(onloaded.find_cache(2).unwrap().alias(), alias_2);

    // No enter or create resent for the survivor.
    let bundle = onloaded.update(&world, &space).unwrap();
    assert!(!bundle.messages().iter().any(|m| matches!(
        m,
        ClientMessage::EnterAoi { id: 2, .. } | ClientMessage::CreateEntity { id: 2, .. }
    )));
    assert!(onloaded.heap_ok());
}

#[test]
fn test_heap_property_held_across_churn() {
    let mut world = basic_world(1);
    for id in 2..40u32 {
        world.insert(Entity::new(
            id,
            1,
            Vec3::new((id * 13 % 450) as f32, 0.0, (id * 7 % 450) as f32),
        ));
    }
    let (mut witness, _log) = witness_with_listener(1);
    let space = SpaceDataStore::new();

    for round in 0..20 {
        let bundle = witness.update(&world, &space).unwrap();
        assert!(witness.heap_ok(), "heap violated at round {}", round);
        for msg in bundle.messages() {
            if let ClientMessage::EnterAoi { id, .. } = msg {
                witness.request_entity_update(&world, *id, None).unwrap();
            }
        }
        // Keep entities moving.
        let moving = 2 + (round % 38) as u32;
        if let Some(e) = world.get_mut(moving) {
            e.position.x += 15.0;
        }
    }
}

#[test]
fn test_replay_mirrors_bundle() {
    let mut world = basic_world(1);
    world.insert(Entity::new(2, 1, Vec3::new(5.0, 0.0, 0.0)));
    let (mut witness, _log) = witness_with_listener(1);
    witness.set_replay(ReplayDataCollector::new());
    let space = SpaceDataStore::new();

    let bundle = witness.update(&world, &space).unwrap();
    let replay = witness.take_replay().unwrap();
    let segments = replay.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].1, bundle.messages());
}

#[test]
fn test_position_detailed_streams_static_entities() {
    let mut world = basic_world(1);
    let mut statue = Entity::new(2, 3, Vec3::new(10.0, 0.0, 0.0));
    statue.is_volatile = false;
    world.insert(statue);
    let (mut witness, _log) = witness_with_listener(1);
    let space = SpaceDataStore::new();

    witness.update(&world, &space).unwrap();
    witness.request_entity_update(&world, 2, None).unwrap();
    witness.update(&world, &space).unwrap();

    // Nothing changed and the entity is not volatile, so it stays quiet.
    let bundle = witness.update(&world, &space).unwrap();
    assert!(messages_for(&bundle, 2).is_empty());

    witness.set_position_detailed(2, true).unwrap();
    let bundle = witness.update(&world, &space).unwrap();
    assert_eq!(messages_for(&bundle, 2).len(), 1);
    assert!(matches!(
        messages_for(&bundle, 2)[0],
        ClientMessage::EntityUpdate { id: 2, .. }
    ));

    witness.set_position_detailed(2, false).unwrap();
    let bundle = witness.update(&world, &space).unwrap();
    assert!(messages_for(&bundle, 2).is_empty());
}

#[test]
fn test_set_aoi_radius_clamps() {
    let mut config = AoiConfig::default();
    config.max_radius = 600.0;
    let listener = RecordingListener::default();
    let mut witness = Witness::new(1, config, Box::new(listener));

    witness.set_aoi_radius(10_000.0, 5.0);
    assert_eq!(witness.aoi_radius(), 600.0);
    witness.set_aoi_radius(0.0, 5.0);
    assert!(witness.aoi_radius() >= 0.1);
}
