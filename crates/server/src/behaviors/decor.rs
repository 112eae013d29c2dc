//! Plants and trees.

use tilerealm_engine::behavior::api::BlockApi;
use tilerealm_engine::behavior::{BlockBehavior, Capabilities, Interaction};
use tilerealm_engine::world::block::{BlockId, BlockLayer};
use tilerealm_engine::world::meta::Metadata;
use tilerealm_engine::world::position::BlockPos;

use super::drop_effect;
use crate::block;

/// A small plant that needs soil on the Floor layer beneath it.
pub struct Plant {
    id: BlockId,
    name: &'static str,
    drops: &'static str,
}

impl Plant {
    pub const fn flower() -> Self {
        Self {
            id: block::FLOWER,
            name: "flower",
            drops: "flower",
        }
    }

    pub const fn tall_grass() -> Self {
        Self {
            id: block::TALL_GRASS,
            name: "tall_grass",
            drops: "seeds",
        }
    }
}

impl BlockBehavior for Plant {
    fn id(&self) -> BlockId {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE.passable()
    }

    fn on_place(&self, api: &mut dyn BlockApi, pos: BlockPos) {
        api.schedule_update_once(pos);
    }

    fn tick_update(&self, api: &mut dyn BlockApi, pos: BlockPos) {
        if !block::is_soil(api.get_block_id_layer(BlockLayer::Floor, pos)) {
            api.set_block(pos, block::AIR);
        }
    }

    fn handle_interaction(&self, action: &str, current: &Metadata, _action_payload: &Metadata) -> Interaction {
        match action {
            "pick" | "cut" | "mine" => {
                Interaction::transformed(block::AIR, Metadata::new(), vec![drop_effect(self.drops)])
            }
            _ => Interaction::unchanged(self.id, current),
        }
    }
}

/// Two tiles tall: the trunk on Active, the canopy on Ceiling.
pub struct Tree;

impl BlockBehavior for Tree {
    fn id(&self) -> BlockId {
        block::TREE
    }

    fn name(&self) -> &'static str {
        "tree"
    }

    fn on_place(&self, api: &mut dyn BlockApi, pos: BlockPos) {
        api.set_block_layer(BlockLayer::Ceiling, pos, block::TREE_CANOPY);
    }

    fn on_break(&self, api: &mut dyn BlockApi, pos: BlockPos) {
        if api.get_block_id_layer(BlockLayer::Ceiling, pos) == block::TREE_CANOPY {
            api.set_block_layer(BlockLayer::Ceiling, pos, block::AIR);
        }
    }

    fn handle_interaction(&self, action: &str, current: &Metadata, _action_payload: &Metadata) -> Interaction {
        match action {
            "chop" => Interaction::transformed(block::AIR, Metadata::new(), vec![drop_effect("wood")]),
            _ => Interaction::unchanged(block::TREE, current),
        }
    }
}
