//! Water and deep water.
//!
//! Water is not tickable: it spreads on scheduled re-checks only. Placing it
//! schedules its own re-check, each spread cell schedules the next, and the
//! level drops by one per step so a spill always terminates.

use tilerealm_engine::behavior::api::BlockApi;
use tilerealm_engine::behavior::{BlockBehavior, Capabilities, Interaction};
use tilerealm_engine::world::block::BlockId;
use tilerealm_engine::world::meta::{MetaValue, Metadata};
use tilerealm_engine::world::position::BlockPos;

use super::uses_tool;
use crate::block::{self, MAX_WATER_LEVEL};

pub struct Water;

impl BlockBehavior for Water {
    fn id(&self) -> BlockId {
        block::WATER
    }

    fn name(&self) -> &'static str {
        "water"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE.passable()
    }

    fn create_metadata(&self) -> Metadata {
        Metadata::new().with("level", MAX_WATER_LEVEL)
    }

    fn on_place(&self, api: &mut dyn BlockApi, pos: BlockPos) {
        api.schedule_update_once(pos);
    }

    fn on_break(&self, api: &mut dyn BlockApi, pos: BlockPos) {
        api.trigger_neighbor_updates(pos);
    }

    fn tick_update(&self, api: &mut dyn BlockApi, pos: BlockPos) {
        let level = api
            .get_block_metadata(pos, "level")
            .and_then(|v| v.as_int())
            .unwrap_or(MAX_WATER_LEVEL);
        if level <= 1 {
            return;
        }
        for neighbor in pos.neighbors() {
            if api.get_block_id(neighbor) == block::AIR {
                api.set_block(neighbor, block::WATER);
                api.set_block_metadata(neighbor, "level", MetaValue::Int(level - 1));
            }
        }
    }

    fn handle_interaction(&self, action: &str, current: &Metadata, action_payload: &Metadata) -> Interaction {
        match action {
            "collect" if uses_tool(action_payload, "bucket") => {
                Interaction::transformed(block::AIR, Metadata::new(), vec!["collect:water".into()])
            }
            "collect" => Interaction::refused(block::WATER, current, "a bucket is needed"),
            _ => Interaction::unchanged(block::WATER, current),
        }
    }
}

/// Open-ocean water. Impassable; collapses into a water source as soon as
/// any orthogonal neighbor is seen not to be water.
pub struct DeepWater;

impl BlockBehavior for DeepWater {
    fn id(&self) -> BlockId {
        block::DEEP_WATER
    }

    fn name(&self) -> &'static str {
        "deep_water"
    }

    fn on_place(&self, api: &mut dyn BlockApi, pos: BlockPos) {
        api.schedule_update_once(pos);
    }

    /// A neighbor that cannot be seen right now does not count as exposure.
    fn tick_update(&self, api: &mut dyn BlockApi, pos: BlockPos) {
        let exposed = pos
            .neighbors()
            .into_iter()
            .any(|n| api.peek_block_id(n).is_some_and(|id| !block::is_water(id)));
        if exposed {
            api.set_block(pos, block::WATER);
            api.set_block_metadata(pos, "level", MetaValue::Int(MAX_WATER_LEVEL));
        }
    }

    fn handle_interaction(&self, action: &str, current: &Metadata, action_payload: &Metadata) -> Interaction {
        match action {
            // Deep water is an endless source.
            "collect" if uses_tool(action_payload, "bucket") => {
                Interaction::updated(block::DEEP_WATER, current.clone(), vec!["collect:water".into()])
            }
            "collect" => Interaction::refused(block::DEEP_WATER, current, "a bucket is needed"),
            _ => Interaction::unchanged(block::DEEP_WATER, current),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_collects_water() {
        let bucket = Metadata::new().with("tool", "bucket");
        let hit = Water.handle_interaction("collect", &Water.create_metadata(), &bucket);
        assert_eq!(hit.block, block::AIR);
        assert_eq!(hit.result.effects, vec!["collect:water".to_string()]);

        let bare = Water.handle_interaction("collect", &Water.create_metadata(), &Metadata::new());
        assert_eq!(bare.block, block::WATER);
        assert!(!bare.result.success);
    }
}
