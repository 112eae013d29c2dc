//! World manager: routing, relocation, persistence and the actor path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use tilerealm_engine::entity::{Entity, EntityId, EntityKind};
use tilerealm_engine::world::block::{Block, BlockId, BlockLayer};
use tilerealm_engine::world::meta::Metadata;
use tilerealm_engine::world::position::{BigChunkPos, BlockPos, Vec2};
use tilerealm_server::block;
use tilerealm_server::collab::{EntityStorage, NetworkManager};
use tilerealm_server::config::WorldConfig;
use tilerealm_server::event_bus::{ChangeSource, WorldChange, WorldChangeBatch};
use tilerealm_server::events::{BlockEvent, Enqueue, EntityEvent};
use tilerealm_server::generator::FlatGenerator;
use tilerealm_server::storage::{JsonDirStorage, MemoryStorage};
use tilerealm_server::world_manager::{Relocation, WorldManager};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> WorldConfig {
    WorldConfig {
        seed: 5,
        region_workers: Some(2),
        ..WorldConfig::default()
    }
}

fn world_with(config: WorldConfig) -> Arc<WorldManager> {
    WorldManager::new_detached(config, Arc::new(block::standard_registry()), Arc::new(FlatGenerator)).unwrap()
}

fn world() -> Arc<WorldManager> {
    world_with(config())
}

#[derive(Default)]
struct RecordingNetwork {
    updates: Mutex<Vec<(BlockPos, BlockLayer, BlockId)>>,
}

impl NetworkManager for RecordingNetwork {
    fn send_block_update(&self, pos: BlockPos, layer: BlockLayer, block: &Block) {
        self.updates.lock().unwrap().push((pos, layer, block.id));
    }
}

fn drain(rx: &mut broadcast::Receiver<WorldChangeBatch>) -> Vec<WorldChangeBatch> {
    let mut batches = Vec::new();
    while let Ok(batch) = rx.try_recv() {
        batches.push(batch);
    }
    batches
}

fn changes(batches: &[WorldChangeBatch]) -> Vec<WorldChange> {
    batches.iter().flat_map(|b| b.changes.iter().cloned()).collect()
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

#[test]
fn one_big_chunk_per_coordinate_under_contention() {
    let world = world();
    let pos = BigChunkPos::new(-3, 4);
    let created: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8).map(|_| s.spawn(|| world.big_chunk(pos))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(world.big_chunk_count(), 1);
    assert!(created.iter().all(|bc| Arc::ptr_eq(bc, &created[0])));
}

#[test]
fn set_then_get_round_trips_everywhere() {
    let world = world();
    for (x, y) in [(0, 0), (-1, -1), (511, 512), (-513, 40), (10_000, -10_000)] {
        let pos = BlockPos::new(x, y);
        world.set_block(pos, Block::new(block::STONE));
        assert_eq!(world.get_block(pos).id, block::STONE, "{pos:?}");
        assert_eq!(world.get_block_layer(BlockLayer::Floor, pos).id, block::GRASS);
    }
    assert_eq!(world.big_chunk_count(), 5);
}

#[test]
fn api_writes_reach_network_and_bus() {
    let world = world();
    let network = Arc::new(RecordingNetwork::default());
    world.set_network_manager(network.clone());
    let mut bus = world.subscribe();

    let pos = BlockPos::new(7, 7);
    world.set_block(pos, Block::new(block::DOOR));

    assert_eq!(
        *network.updates.lock().unwrap(),
        vec![(pos, BlockLayer::Active, block::DOOR)]
    );
    let batches = drain(&mut bus);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].source, ChangeSource::Api);
}

// ---------------------------------------------------------------------------
// Routed events
// ---------------------------------------------------------------------------

#[test]
fn routed_change_applies_on_pump() {
    let world = world();
    let network = Arc::new(RecordingNetwork::default());
    world.set_network_manager(network.clone());
    let mut bus = world.subscribe();

    let pos = BlockPos::new(600, 5);
    let outcome = world.route_block_event(BlockEvent::change(pos, BlockLayer::Active, Block::new(block::STONE)));
    assert_eq!(outcome, Enqueue::Enqueued);

    // The network hears about it at routing time; the cell changes later.
    assert_eq!(network.updates.lock().unwrap().len(), 1);
    assert_eq!(world.get_block(pos).id, block::AIR);

    world.pump();
    assert_eq!(world.get_block(pos).id, block::STONE);
    let batches = drain(&mut bus);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].source, ChangeSource::Routed(BigChunkPos::new(1, 0)));
}

#[test]
fn routed_interaction_applies_in_order() {
    let world = world();
    let pos = BlockPos::new(9, 9);
    world.set_block(pos, Block::new(block::DOOR));

    for _ in 0..3 {
        world.route_block_event(BlockEvent::Interact {
            pos,
            action: "use".into(),
            payload: Metadata::new(),
        });
    }
    world.pump();
    assert_eq!(world.get_block(pos).payload.get_bool("open"), Some(true));
}

#[test]
fn full_inbox_drops_and_counts() {
    let world = world_with(WorldConfig {
        big_chunk_queue: 2,
        ..config()
    });

    let outcomes: Vec<Enqueue> = (0..5)
        .map(|x| world.route_block_event(BlockEvent::ScheduleOnce { pos: BlockPos::new(x, 0) }))
        .collect();
    assert_eq!(outcomes.iter().filter(|o| o.is_enqueued()).count(), 2);
    assert_eq!(outcomes.iter().filter(|o| **o == Enqueue::DroppedFull).count(), 3);

    let snapshot = world.metrics();
    assert_eq!(snapshot.inbox_dropped, 3);
    assert_eq!(snapshot.inbox_enqueued, 2);
}

#[test]
fn routed_spawn_and_damage() {
    let world = world();
    let id = EntityId(77);
    let monster = Entity::new(id, EntityKind::Monster, Vec2::new(40.5, 40.5))
        .with_metadata(Metadata::new().with("health", 5i64));
    assert_eq!(world.route_entity_event(EntityEvent::Spawn(monster)), Some(Enqueue::Enqueued));
    world.pump();
    assert!(world.entity(id).is_some());
    assert_eq!(world.entity_count(), 1);

    let mut bus = world.subscribe();
    world.route_entity_event(EntityEvent::Interact {
        id,
        action: "damage".into(),
        amount: 10.0,
    });
    world.pump();

    assert!(world.entity(id).is_none());
    assert_eq!(world.entity_count(), 0);
    assert!(matches!(
        changes(&drain(&mut bus)).as_slice(),
        [WorldChange::EntityDespawned { id: EntityId(77), .. }]
    ));
    assert_eq!(
        world.route_entity_event(EntityEvent::Despawn { id }),
        None,
        "unknown entities are not routed"
    );
}

#[test]
fn routed_move_across_boundary_relocates() {
    let world = world();
    let id = world
        .spawn_entity(EntityKind::Player, Vec2::new(510.5, 1.5), Metadata::new())
        .unwrap();

    world.route_entity_event(EntityEvent::Move {
        id,
        position: Vec2::new(515.5, 1.5),
    });
    world.pump();

    let east = world.loaded_big_chunk(BigChunkPos::new(1, 0)).unwrap();
    assert_eq!(east.entity(id).map(|e| e.position), Some(Vec2::new(515.5, 1.5)));
    assert!(world.big_chunk(BigChunkPos::new(0, 0)).entity(id).is_none());
    assert_eq!(world.metrics().relocations, 1);
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[test]
fn entity_ids_start_at_one_thousand() {
    let world = world();
    let a = world.spawn_entity(EntityKind::Npc, Vec2::new(1.5, 1.5), Metadata::new());
    let b = world.spawn_entity(EntityKind::Npc, Vec2::new(3.5, 1.5), Metadata::new());
    assert_eq!(a, Some(EntityId(1000)));
    assert_eq!(b, Some(EntityId(1001)));
}

#[test]
fn concurrent_relocation_publishes_one_despawn_and_one_spawn() {
    let world = world();
    let old = Vec2::new(510.5, 5.5);
    let new = Vec2::new(513.5, 5.5);
    let id = world.spawn_entity(EntityKind::Npc, old, Metadata::new()).unwrap();
    let mut bus = world.subscribe();

    let outcomes: Vec<Relocation> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| s.spawn(|| world.process_entity_movement(id, old, new)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let relocated = outcomes
        .iter()
        .filter(|o| matches!(o, Relocation::Relocated { .. }))
        .count();
    assert_eq!(relocated, 1, "{outcomes:?}");

    let changes = changes(&drain(&mut bus));
    let despawns: Vec<_> = changes
        .iter()
        .filter(|c| matches!(c, WorldChange::EntityDespawned { .. }))
        .collect();
    let spawns: Vec<_> = changes
        .iter()
        .filter(|c| matches!(c, WorldChange::EntitySpawned { .. }))
        .collect();
    assert!(matches!(
        despawns.as_slice(),
        [WorldChange::EntityDespawned { big_chunk, .. }] if *big_chunk == BigChunkPos::new(0, 0)
    ));
    assert!(matches!(
        spawns.as_slice(),
        [WorldChange::EntitySpawned { big_chunk, .. }] if *big_chunk == BigChunkPos::new(1, 0)
    ));

    assert!(world.big_chunk(BigChunkPos::new(0, 0)).entity(id).is_none());
    assert!(world.big_chunk(BigChunkPos::new(1, 0)).entity(id).is_some());
    assert_eq!(world.entity_count(), 1);
}

#[test]
fn spawns_of_a_live_id_are_refused() {
    let world = world();
    let home = Vec2::new(5.5, 5.5);
    let id = world.spawn_entity(EntityKind::Npc, home, Metadata::new()).unwrap();
    let elsewhere = Entity::new(id, EntityKind::Npc, Vec2::new(600.5, 5.5));

    assert!(!world.add_entity(elsewhere.clone()));
    assert_eq!(world.route_entity_event(EntityEvent::Spawn(elsewhere)), None);
    world.pump();

    assert!(world.loaded_big_chunk(BigChunkPos::new(1, 0)).is_none());
    assert_eq!(world.entity(id).map(|e| e.position), Some(home));
    assert_eq!(world.entity_count(), 1);
}

#[test]
fn refused_routed_spawn_leaves_the_region_copy_alone() {
    let world = world();
    let id = EntityId(42);
    let first = Vec2::new(20.5, 20.5);
    let second = Vec2::new(24.5, 20.5);
    for position in [first, second] {
        let spawn = EntityEvent::Spawn(Entity::new(id, EntityKind::Npc, position));
        assert_eq!(world.route_entity_event(spawn), Some(Enqueue::Enqueued));
    }
    let mut bus = world.subscribe();
    world.pump();

    assert_eq!(world.entity(id).map(|e| e.position), Some(first));
    assert_eq!(world.entity_count(), 1);
    assert_eq!(world.query_entities_in_range(first, 0.5), vec![id]);
    assert!(world.query_entities_in_range(second, 0.5).is_empty());
    assert!(matches!(
        changes(&drain(&mut bus)).as_slice(),
        [WorldChange::EntitySpawned { id: EntityId(42), .. }]
    ));
}

#[test]
fn racing_routed_spawns_keep_one_copy() {
    let world = world();
    let id = EntityId(43);
    let west = Vec2::new(20.5, 30.5);
    let east = Vec2::new(620.5, 30.5);
    for position in [west, east] {
        let spawn = EntityEvent::Spawn(Entity::new(id, EntityKind::Npc, position));
        assert_eq!(world.route_entity_event(spawn), Some(Enqueue::Enqueued));
    }
    world.pump();

    let holders = [BigChunkPos::new(0, 0), BigChunkPos::new(1, 0)]
        .into_iter()
        .filter(|pos| world.big_chunk(*pos).entity(id).is_some())
        .count();
    assert_eq!(holders, 1);
    let kept = world.entity(id).unwrap().position;
    assert!(kept == west || kept == east, "kept {kept:?}");
    assert_eq!(world.entity_count(), 1);
    assert_eq!(world.query_entities_in_range(kept, 0.5), vec![id]);
}

#[test]
fn huge_query_radius_finds_everything() {
    let world = world();
    let near = world.spawn_entity(EntityKind::Npc, Vec2::new(1.5, 1.5), Metadata::new()).unwrap();
    let far = world
        .spawn_entity(EntityKind::Npc, Vec2::new(-70_000.5, 300_000.5), Metadata::new())
        .unwrap();

    assert_eq!(world.query_entities_in_range(Vec2::ZERO, 1_000_000.0), vec![near, far]);
    assert_eq!(world.query_entities_in_range(Vec2::ZERO, f32::INFINITY), vec![near, far]);
}

#[test]
fn relocation_of_unknown_entity_is_not_found() {
    let world = world();
    let outcome = world.process_entity_movement(EntityId(4), Vec2::new(1.5, 1.5), Vec2::new(600.5, 1.5));
    assert_eq!(outcome, Relocation::NotFound);
}

#[test]
fn npcs_wander_and_regions_follow() {
    let world = world();
    let start = Vec2::new(100.5, 100.5);
    let id = world.spawn_entity(EntityKind::Npc, start, Metadata::new()).unwrap();

    for _ in 0..30 {
        world.tick_all();
    }

    let now = world.entity(id).unwrap().position;
    assert!((now.distance_squared(start) - 1.0).abs() < 1e-4, "moved to {now:?}");
    assert!(world.query_entities_in_range(now, 0.1).contains(&id));
    assert!(!world.query_entities_in_range(start, 0.1).contains(&id));
}

#[test]
fn monsters_close_in_on_players() {
    let world = world();
    let player = Vec2::new(60.5, 60.5);
    let start = Vec2::new(66.5, 60.5);
    world.spawn_entity(EntityKind::Player, player, Metadata::new()).unwrap();
    let monster = world.spawn_entity(EntityKind::Monster, start, Metadata::new()).unwrap();

    for _ in 0..100 {
        world.tick_all();
    }

    let now = world.entity(monster).unwrap().position;
    assert!(now.distance_squared(player) < start.distance_squared(player));
    assert!(now.distance_squared(player) >= 0.9);
}

#[test]
fn region_simulation_moves_entities_across_big_chunks() {
    let world = world();
    let near = world
        .spawn_entity(EntityKind::Item, Vec2::new(100.5, 100.5), Metadata::new())
        .unwrap();
    let edge = world
        .spawn_entity(EntityKind::Item, Vec2::new(511.5, 8.5), Metadata::new())
        .unwrap();
    assert!(world.set_entity_velocity(near, Vec2::new(10.0, 0.0)));
    assert!(world.set_entity_velocity(edge, Vec2::new(20.0, 0.0)));

    let update = world.update_regions(0.1);
    assert_eq!(update.moved.len(), 2);

    let near_pos = world.entity(near).unwrap().position;
    assert!((near_pos.x - 101.5).abs() < 1e-4);
    let east = world.loaded_big_chunk(BigChunkPos::new(1, 0)).unwrap();
    assert!(east.entity(edge).is_some());
    assert_eq!(world.metrics().relocations, 1);
}

#[test]
fn region_simulation_deactivates_dead_entities() {
    let world = world();
    let id = world
        .spawn_entity(
            EntityKind::Npc,
            Vec2::new(20.5, 20.5),
            Metadata::new().with("health", 0i64),
        )
        .unwrap();

    let update = world.update_regions(0.05);
    assert_eq!(update.deactivated, vec![id]);
    let entity = world.entity(id).unwrap();
    assert!(!entity.active);
    assert_eq!(entity.health(), Some(0.0));
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn queued_save_reaches_storage_and_is_throttled() {
    let world = world();
    let storage = Arc::new(MemoryStorage::new());
    world.set_storage(storage.clone());

    let id = world
        .spawn_entity(EntityKind::Npc, Vec2::new(3.5, 3.5), Metadata::new())
        .unwrap();
    world.set_block(BlockPos::new(1, 1), Block::new(block::STONE));

    assert_eq!(world.save_world(false), 1);
    world.pump();
    let origin = BigChunkPos::new(0, 0);
    let saved = storage.saved(origin).unwrap();
    assert_eq!(saved.iter().map(|e| e.id).collect::<Vec<_>>(), vec![id]);
    assert_eq!(storage.chunks_saved(origin), 1);

    assert_eq!(world.save_world(false), 0, "second save inside the throttle window");

    world.set_block(BlockPos::new(2, 2), Block::new(block::DIRT));
    assert_eq!(world.save_world(true), 1);
    assert_eq!(storage.chunks_saved(origin), 2);
}

#[test]
fn saved_entities_load_with_their_big_chunk() {
    let world = world();
    let storage = Arc::new(MemoryStorage::new());
    let far = BigChunkPos::new(2, 0);
    storage.preload(
        far,
        vec![Entity::new(EntityId(5000), EntityKind::Npc, Vec2::new(1030.5, 4.5))],
    );
    world.set_storage(storage);

    assert!(world.entity(EntityId(5000)).is_none());
    world.big_chunk(far);
    assert!(world.entity(EntityId(5000)).is_some());
    assert_eq!(world.entity_count(), 1);

    let next = world
        .spawn_entity(EntityKind::Npc, Vec2::new(0.5, 0.5), Metadata::new())
        .unwrap();
    assert!(next.0 > 5000);
}

#[test]
fn json_storage_leaves_chunk_changes_dirty() {
    let dir = std::env::temp_dir().join(format!("tilerealm-dirty-{}", std::process::id()));
    let world = world();
    world.set_storage(Arc::new(JsonDirStorage::open(&dir).unwrap()));
    world
        .spawn_entity(EntityKind::Npc, Vec2::new(3.5, 3.5), Metadata::new())
        .unwrap();
    world.set_block(BlockPos::new(1, 1), Block::new(block::STONE));

    assert_eq!(world.save_world(true), 1);
    assert!(dir.join("entities").join("b.0.0.json").exists());
    let (dirty, _) = world.big_chunk(BigChunkPos::new(0, 0)).take_dirty_chunks();
    assert_eq!(dirty.len(), 1);
    let _ = std::fs::remove_dir_all(&dir);
}

/// Storage that looks at the world while a BigChunk loads.
#[derive(Default)]
struct InspectingStorage {
    world: OnceLock<Weak<WorldManager>>,
    loaded_before: Mutex<Vec<usize>>,
    loads: AtomicUsize,
}

impl EntityStorage for InspectingStorage {
    fn save_entities(&self, _big_chunk: BigChunkPos, _entities: &[Entity]) -> anyhow::Result<()> {
        Ok(())
    }

    fn load_entities(&self, _big_chunk: BigChunkPos) -> anyhow::Result<Option<Vec<Entity>>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(world) = self.world.get().and_then(Weak::upgrade) {
            self.loaded_before.lock().unwrap().push(world.big_chunk_count());
        }
        Ok(None)
    }
}

#[test]
fn storage_reads_happen_outside_the_big_chunk_map() {
    let world = world();
    let storage = Arc::new(InspectingStorage::default());
    storage.world.set(Arc::downgrade(&world)).unwrap();
    world.set_storage(storage.clone());

    let (tx, rx) = std::sync::mpsc::channel();
    let creator = Arc::clone(&world);
    std::thread::spawn(move || {
        creator.big_chunk(BigChunkPos::new(0, 0));
        creator.big_chunk(BigChunkPos::new(3, -2));
        let _ = tx.send(());
    });
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok(), "BigChunk creation stalled");

    assert_eq!(storage.loads.load(Ordering::SeqCst), 2);
    assert_eq!(*storage.loaded_before.lock().unwrap(), vec![0, 1]);
}

// ---------------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn actors_apply_routed_events_and_shut_down() {
    let world = WorldManager::new(config(), Arc::new(block::standard_registry()), Arc::new(FlatGenerator)).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    world.set_storage(storage.clone());
    assert!(world.start());
    assert!(!world.start(), "the world loop starts once");

    let pos = BlockPos::new(700, 3);
    world.route_block_event(BlockEvent::change(pos, BlockLayer::Active, Block::new(block::STONE)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(world.get_block(pos).id, block::STONE);

    assert_eq!(world.shutdown().await, 1);
    assert!(world.is_shut_down());
    assert_eq!(storage.chunks_saved(BigChunkPos::new(1, 0)), 1);
}
