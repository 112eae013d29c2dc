//! Ground blocks: the inert ones, stone and growing grass.

use rand::Rng;
use tilerealm_engine::behavior::api::BlockApi;
use tilerealm_engine::behavior::{BlockBehavior, Capabilities, Interaction};
use tilerealm_engine::world::block::BlockId;
use tilerealm_engine::world::meta::{MetaValue, Metadata};
use tilerealm_engine::world::position::BlockPos;

use super::drop_effect;
use crate::block;

/// A block with no lifecycle of its own. Digging it yields `drops`, or is
/// refused when it has none.
pub struct Simple {
    id: BlockId,
    name: &'static str,
    capabilities: Capabilities,
    drops: Option<&'static str>,
}

impl Simple {
    pub const fn new(id: BlockId, name: &'static str) -> Self {
        Self {
            id,
            name,
            capabilities: Capabilities::NONE,
            drops: None,
        }
    }

    pub const fn passable(mut self) -> Self {
        self.capabilities = self.capabilities.passable();
        self
    }

    pub const fn drops(mut self, item: &'static str) -> Self {
        self.drops = Some(item);
        self
    }
}

impl BlockBehavior for Simple {
    fn id(&self) -> BlockId {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn handle_interaction(&self, action: &str, current: &Metadata, _action_payload: &Metadata) -> Interaction {
        if self.id == block::AIR || !matches!(action, "dig" | "mine") {
            return Interaction::unchanged(self.id, current);
        }
        match self.drops {
            Some(item) => Interaction::transformed(block::AIR, Metadata::new(), vec![drop_effect(item)]),
            None => Interaction::refused(self.id, current, format!("{} cannot be broken", self.name)),
        }
    }
}

pub const STONE_HARDNESS: i64 = 3;

/// Each "mine" chips one point of hardness; the last one breaks it.
pub struct Stone;

impl BlockBehavior for Stone {
    fn id(&self) -> BlockId {
        block::STONE
    }

    fn name(&self) -> &'static str {
        "stone"
    }

    fn create_metadata(&self) -> Metadata {
        Metadata::new().with("hardness", STONE_HARDNESS)
    }

    fn handle_interaction(&self, action: &str, current: &Metadata, _action_payload: &Metadata) -> Interaction {
        if action != "mine" {
            return Interaction::unchanged(block::STONE, current);
        }
        let hardness = current.get_int("hardness").unwrap_or(STONE_HARDNESS) - 1;
        if hardness <= 0 {
            Interaction::transformed(block::AIR, Metadata::new(), vec![drop_effect("stone")])
        } else {
            Interaction::updated(block::STONE, current.clone().with("hardness", hardness), Vec::new())
        }
    }
}

pub const MAX_GROWTH: i64 = 5;
/// One in this many ticks advances growth.
const GROWTH_ODDS: u32 = 8;

/// Grass grows through stages 0..=5 and turns to dirt when dug.
pub struct Grass;

impl BlockBehavior for Grass {
    fn id(&self) -> BlockId {
        block::GRASS
    }

    fn name(&self) -> &'static str {
        "grass"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE.tickable().passable()
    }

    fn create_metadata(&self) -> Metadata {
        Metadata::new().with("growth", 0i64)
    }

    fn tick_update(&self, api: &mut dyn BlockApi, pos: BlockPos) {
        let growth = api
            .get_block_metadata(pos, "growth")
            .and_then(|v| v.as_int())
            .unwrap_or(0)
            .clamp(0, MAX_GROWTH);
        if growth < MAX_GROWTH && api.rng().gen_ratio(1, GROWTH_ODDS) {
            api.set_block_metadata(pos, "growth", MetaValue::Int(growth + 1));
        }
    }

    fn handle_interaction(&self, action: &str, current: &Metadata, _action_payload: &Metadata) -> Interaction {
        match action {
            "dig" | "mine" => Interaction::transformed(block::DIRT, Metadata::new(), Vec::new()),
            _ => Interaction::unchanged(block::GRASS, current),
        }
    }
}
