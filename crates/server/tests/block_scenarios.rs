//! Block lifecycle scenarios run through a detached world.

use std::sync::Arc;

use tilerealm_engine::entity::EntityId;
use tilerealm_engine::world::block::{Block, BlockId, BlockLayer};
use tilerealm_engine::world::meta::Metadata;
use tilerealm_engine::world::position::{BigChunkPos, BlockPos};
use tilerealm_server::block;
use tilerealm_server::config::WorldConfig;
use tilerealm_server::events::BlockEvent;
use tilerealm_server::generator::FlatGenerator;
use tilerealm_server::world_manager::WorldManager;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn world() -> Arc<WorldManager> {
    let config = WorldConfig {
        seed: 99,
        region_workers: Some(2),
        ..WorldConfig::default()
    };
    WorldManager::new_detached(config, Arc::new(block::standard_registry()), Arc::new(FlatGenerator)).unwrap()
}

fn level(world: &WorldManager, pos: BlockPos) -> Option<i64> {
    world.get_block(pos).payload.get_int("level")
}

fn place(world: &WorldManager, pos: BlockPos, id: BlockId) {
    world.set_block(pos, Block::new(id));
}

// ---------------------------------------------------------------------------
// Water
// ---------------------------------------------------------------------------

#[test]
fn water_placed_then_removed_schedules_neighbors() {
    let world = world();
    let pos = BlockPos::new(5, 5);

    place(&world, pos, block::WATER);
    assert_eq!(world.get_block(pos).id, block::WATER);
    assert_eq!(level(&world, pos), Some(7));

    place(&world, pos, block::AIR);
    assert_eq!(world.get_block(pos).id, block::AIR);
    assert!(world.get_block(pos).payload.is_empty());

    let scheduled = world.big_chunk(BigChunkPos::new(0, 0)).scheduled_once();
    for neighbor in [
        BlockPos::new(6, 5),
        BlockPos::new(4, 5),
        BlockPos::new(5, 6),
        BlockPos::new(5, 4),
    ] {
        assert!(scheduled.contains(&neighbor), "{neighbor:?} not scheduled");
    }
}

#[test]
fn water_spreads_one_ring_per_tick_and_stops() {
    let world = world();
    let source = BlockPos::new(100, 100);
    place(&world, source, block::WATER);

    world.tick_all();
    for neighbor in source.neighbors() {
        assert_eq!(world.get_block(neighbor).id, block::WATER);
        assert_eq!(level(&world, neighbor), Some(6));
    }
    assert_eq!(world.get_block(BlockPos::new(102, 100)).id, block::AIR);

    for _ in 0..10 {
        world.tick_all();
    }
    // Level 1 water never spreads: the spill stays within six steps.
    assert_eq!(level(&world, BlockPos::new(106, 100)), Some(1));
    assert_eq!(world.get_block(BlockPos::new(107, 100)).id, block::AIR);
}

#[test]
fn water_crosses_big_chunk_boundary() {
    let world = world();
    place(&world, BlockPos::new(511, 10), block::WATER);
    world.tick_all();

    let across = BlockPos::new(512, 10);
    assert_eq!(world.get_block(across).id, block::WATER);
    assert_eq!(level(&world, across), Some(6));
    assert_eq!(world.big_chunk_count(), 2);
}

#[test]
fn water_leaves_blocks_across_the_boundary_alone() {
    let world = world();
    let chest = BlockPos::new(512, 10);
    place(&world, chest, block::CHEST);
    world.interact_block(chest, "deposit", &Metadata::new().with("item", "apple").with("count", 2i64));
    place(&world, BlockPos::new(511, 10), block::WATER);

    for _ in 0..3 {
        world.tick_all();
    }
    let after = world.get_block(chest);
    assert_eq!(after.id, block::CHEST);
    assert_eq!(after.payload.get_map("items").and_then(|m| m.get_int("apple")), Some(2));
    assert!(!after.payload.contains_key("level"));
    assert_eq!(world.get_block(BlockPos::new(510, 10)).id, block::WATER);
}

#[test]
fn guarded_write_loses_to_a_newer_block() {
    let world = world();
    let pos = BlockPos::new(520, 40);
    place(&world, pos, block::STONE);

    world.route_block_event(BlockEvent::Change {
        pos,
        layer: BlockLayer::Active,
        block: Block::new(block::WATER),
        expected: Some(block::AIR),
    });
    world.pump();
    assert_eq!(world.get_block(pos).id, block::STONE);
}

#[test]
fn bucket_collects_water() {
    let world = world();
    let pos = BlockPos::new(3, 3);
    place(&world, pos, block::WATER);

    let bare = world.interact_block(pos, "collect", &Metadata::new());
    assert!(!bare.success);
    assert_eq!(world.get_block(pos).id, block::WATER);

    let bucket = Metadata::new().with("tool", "bucket");
    let collected = world.interact_block(pos, "collect", &bucket);
    assert!(collected.success);
    assert_eq!(collected.effects, vec!["collect:water".to_string()]);
    assert_eq!(world.get_block(pos).id, block::AIR);
}

// ---------------------------------------------------------------------------
// Deep water
// ---------------------------------------------------------------------------

#[test]
fn deep_water_holds_until_exposed() {
    let world = world();
    let center = BlockPos::new(40, 40);
    place(&world, center, block::DEEP_WATER);
    for neighbor in center.neighbors() {
        let id = if neighbor.x > center.x { block::WATER } else { block::DEEP_WATER };
        place(&world, neighbor, id);
    }

    let big_chunk = world.big_chunk(center.big_chunk());
    let deep = Arc::clone(world.registry().get(block::DEEP_WATER).unwrap());

    big_chunk.with_block_api(|api| deep.tick_update(api, center));
    assert_eq!(world.get_block(center).id, block::DEEP_WATER);

    place(&world, BlockPos::new(39, 40), block::AIR);
    big_chunk.with_block_api(|api| deep.tick_update(api, center));
    assert_eq!(world.get_block(center).id, block::WATER);
    assert_eq!(level(&world, center), Some(7));
}

#[test]
fn deep_water_on_the_boundary_holds_while_surrounded() {
    let world = world();
    let center = BlockPos::new(511, 10);
    place(&world, center, block::DEEP_WATER);
    for neighbor in center.neighbors() {
        let id = if neighbor.x > center.x { block::WATER } else { block::DEEP_WATER };
        place(&world, neighbor, id);
    }
    assert_eq!(world.get_block(BlockPos::new(512, 10)).id, block::WATER);

    world.tick_all();
    assert_eq!(world.get_block(center).id, block::DEEP_WATER);
}

// ---------------------------------------------------------------------------
// Grass
// ---------------------------------------------------------------------------

#[test]
fn grass_growth_is_bounded_and_monotonic() {
    let world = world();
    let pos = BlockPos::new(0, 0);
    place(&world, pos, block::GRASS);
    let big_chunk = world.big_chunk(BigChunkPos::new(0, 0));
    assert_eq!(big_chunk.tickable_positions(), vec![pos]);

    let mut previous = 0;
    for _ in 0..1000 {
        big_chunk.process_tick();
        let growth = world.get_block(pos).payload.get_int("growth").unwrap();
        assert!((0..=5).contains(&growth), "growth {growth} out of range");
        assert!(growth >= previous, "growth went from {previous} to {growth}");
        previous = growth;
    }
    assert_eq!(previous, 5);
    assert_eq!(big_chunk.tick_count(), 1000);
}

#[test]
fn dug_grass_leaves_the_tick_set() {
    let world = world();
    let pos = BlockPos::new(12, 12);
    place(&world, pos, block::GRASS);

    let result = world.interact_block(pos, "dig", &Metadata::new());
    assert!(result.success);
    assert_eq!(world.get_block(pos).id, block::DIRT);
    assert!(world.big_chunk(BigChunkPos::new(0, 0)).tickable_positions().is_empty());
}

#[test]
fn floor_and_ceiling_never_tick() {
    let world = world();
    let pos = BlockPos::new(8, 8);
    world.set_block_layer(BlockLayer::Floor, pos, Block::new(block::GRASS));
    world.set_block_layer(BlockLayer::Ceiling, pos, Block::new(block::GRASS));
    assert!(world.big_chunk(BigChunkPos::new(0, 0)).tickable_positions().is_empty());
    assert_eq!(world.get_block_layer(BlockLayer::Ceiling, pos).id, block::GRASS);
}

// ---------------------------------------------------------------------------
// Decoration and interactive blocks
// ---------------------------------------------------------------------------

#[test]
fn flower_without_soil_breaks_on_recheck() {
    let world = world();
    let pos = BlockPos::new(20, 20);
    world.set_block_layer(BlockLayer::Floor, pos, Block::new(block::SAND));
    place(&world, pos, block::FLOWER);

    world.tick_all();
    assert_eq!(world.get_block(pos).id, block::AIR);

    let rooted = BlockPos::new(21, 20);
    place(&world, rooted, block::FLOWER);
    world.tick_all();
    assert_eq!(world.get_block(rooted).id, block::FLOWER);
}

#[test]
fn stone_needs_three_hits() {
    let world = world();
    let pos = BlockPos::new(15, 2);
    place(&world, pos, block::STONE);

    for _ in 0..2 {
        let hit = world.interact_block(pos, "mine", &Metadata::new());
        assert!(hit.success);
        assert_eq!(world.get_block(pos).id, block::STONE);
    }
    let last = world.interact_block(pos, "mine", &Metadata::new());
    assert_eq!(last.effects, vec!["drop:stone".to_string()]);
    assert_eq!(world.get_block(pos).id, block::AIR);
}

#[test]
fn chest_keeps_items_between_interactions() {
    let world = world();
    let pos = BlockPos::new(30, 30);
    place(&world, pos, block::CHEST);
    let stack = |count: i64| Metadata::new().with("item", "apple").with("count", count);

    let deposit = world.interact_block(pos, "deposit", &stack(3));
    assert_eq!(deposit.effects, vec!["deposit:apple:3".to_string()]);
    assert!(!world.interact_block(pos, "withdraw", &stack(5)).success);
    assert!(world.interact_block(pos, "withdraw", &stack(2)).success);

    let items = world.get_block(pos).payload.get_map("items").cloned().unwrap();
    assert_eq!(items.get_int("apple"), Some(1));
}

#[test]
fn chest_overflow_is_refused_and_the_big_chunk_keeps_running() {
    let world = world();
    let pos = BlockPos::new(31, 30);
    place(&world, pos, block::CHEST);
    let hoard = Metadata::new().with("item", "gold").with("count", i64::MAX);

    assert!(world.interact_block(pos, "deposit", &hoard).success);
    for _ in 0..2 {
        world.route_block_event(BlockEvent::Interact {
            pos,
            action: "deposit".into(),
            payload: hoard.clone(),
        });
    }
    world.pump();

    let items = world.get_block(pos).payload.get_map("items").cloned().unwrap();
    assert_eq!(items.get_int("gold"), Some(i64::MAX));
    let one = Metadata::new().with("item", "gold").with("count", 1i64);
    assert!(world.interact_block(pos, "withdraw", &one).success);
}

#[test]
fn players_open_doors_but_not_stone() {
    let world = world();
    let door = BlockPos::new(50, 50);
    let stone = BlockPos::new(51, 50);
    place(&world, door, block::DOOR);
    place(&world, stone, block::STONE);

    assert!(world.interact_player(door, EntityId(1)));
    assert_eq!(world.get_block(door).payload.get_bool("open"), Some(true));
    assert!(world.interact_player(door, EntityId(1)));
    assert_eq!(world.get_block(door).payload.get_bool("open"), Some(false));

    assert!(!world.interact_player(stone, EntityId(1)));
}
