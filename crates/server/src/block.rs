//! Block type catalogue and property lookups.
//!
//! IDs are grouped by convention only: basic terrain below 100, decoration
//! from 100, interactive blocks from 200, special blocks from 1000.

use tilerealm_engine::behavior::registry::BlockRegistry;
use tilerealm_engine::world::block::BlockId;

use crate::behaviors::{decor, fluid, interactive, terrain};

// -- Basic --
pub const AIR: BlockId = BlockId::AIR;
pub const STONE: BlockId = BlockId(1);
pub const DIRT: BlockId = BlockId(2);
pub const GRASS: BlockId = BlockId(3);
pub const SAND: BlockId = BlockId(4);
pub const WATER: BlockId = BlockId(5);
pub const DEEP_WATER: BlockId = BlockId(6);
pub const BEDROCK: BlockId = BlockId(7);

// -- Decorative --
pub const FLOWER: BlockId = BlockId(100);
pub const TALL_GRASS: BlockId = BlockId(101);
pub const TREE: BlockId = BlockId(102);
/// Upper half of a tree; lives on the Ceiling layer.
pub const TREE_CANOPY: BlockId = BlockId(103);

// -- Interactive --
pub const DOOR: BlockId = BlockId(200);
pub const CHEST: BlockId = BlockId(201);

// -- Special --
pub const BARRIER: BlockId = BlockId(1000);

/// Water level of a source block.
pub const MAX_WATER_LEVEL: i64 = 7;

/// Can plants root in this floor block?
pub fn is_soil(id: BlockId) -> bool {
    id == DIRT || id == GRASS
}

/// Either kind of water.
pub fn is_water(id: BlockId) -> bool {
    id == WATER || id == DEEP_WATER
}

/// Registry with every block in the catalogue.
pub fn standard_registry() -> BlockRegistry {
    let mut registry = BlockRegistry::new();

    registry.add(terrain::Simple::new(AIR, "air").passable());
    registry.add(terrain::Stone);
    registry.add(terrain::Simple::new(DIRT, "dirt").drops("dirt"));
    registry.add(terrain::Grass);
    registry.add(terrain::Simple::new(SAND, "sand").drops("sand"));
    registry.add(terrain::Simple::new(BEDROCK, "bedrock"));

    registry.add(fluid::Water);
    registry.add(fluid::DeepWater);

    registry.add(decor::Plant::flower());
    registry.add(decor::Plant::tall_grass());
    registry.add(decor::Tree);
    registry.add(terrain::Simple::new(TREE_CANOPY, "tree_canopy"));

    registry.add(interactive::Door);
    registry.add(interactive::Chest);

    registry.add(terrain::Simple::new(BARRIER, "barrier"));

    tracing::debug!("Standard registry: {} block types", registry.len());
    registry
}
