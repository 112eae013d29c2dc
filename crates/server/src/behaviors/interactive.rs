//! Blocks players use directly.

use tilerealm_engine::behavior::api::BlockApi;
use tilerealm_engine::behavior::{BlockBehavior, Capabilities, Interaction};
use tilerealm_engine::entity::EntityId;
use tilerealm_engine::world::block::BlockId;
use tilerealm_engine::world::meta::{MetaValue, Metadata};
use tilerealm_engine::world::position::BlockPos;

use super::drop_effect;
use crate::block;

pub struct Door;

impl BlockBehavior for Door {
    fn id(&self) -> BlockId {
        block::DOOR
    }

    fn name(&self) -> &'static str {
        "door"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE.interactable()
    }

    fn create_metadata(&self) -> Metadata {
        Metadata::new().with("open", false)
    }

    fn handle_interaction(&self, action: &str, current: &Metadata, _action_payload: &Metadata) -> Interaction {
        match action {
            "use" | "toggle" => {
                let open = current.get_bool("open").unwrap_or(false);
                Interaction::updated(block::DOOR, current.clone().with("open", !open), Vec::new())
            }
            "mine" => Interaction::transformed(block::AIR, Metadata::new(), vec![drop_effect("door")]),
            _ => Interaction::unchanged(block::DOOR, current),
        }
    }

    fn interact_with_player(&self, api: &mut dyn BlockApi, pos: BlockPos, _player: EntityId) -> bool {
        let open = api
            .get_block_metadata(pos, "open")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        api.set_block_metadata(pos, "open", MetaValue::Bool(!open));
        true
    }
}

/// Item storage. `items` maps item name to count.
pub struct Chest;

impl Chest {
    fn transfer(current: &Metadata, action_payload: &Metadata, deposit: bool) -> Interaction {
        let Some(item) = action_payload.get_str("item") else {
            return Interaction::refused(block::CHEST, current, "no item given");
        };
        let count = action_payload.get_int("count").unwrap_or(1);
        if count <= 0 {
            return Interaction::refused(block::CHEST, current, "count must be positive");
        }

        let mut items = current.get_map("items").cloned().unwrap_or_default();
        let held = items.get_int(item).unwrap_or(0);
        let left = if deposit {
            match held.checked_add(count) {
                Some(total) => total,
                None => return Interaction::refused(block::CHEST, current, format!("no room for more {item}")),
            }
        } else if held >= count {
            held - count
        } else {
            return Interaction::refused(block::CHEST, current, format!("only {held} {item} stored"));
        };

        if left == 0 {
            items.remove(item);
        } else {
            items.set(item, left);
        }
        let verb = if deposit { "deposit" } else { "withdraw" };
        Interaction::updated(
            block::CHEST,
            current.clone().with("items", items),
            vec![format!("{verb}:{item}:{count}")],
        )
    }
}

impl BlockBehavior for Chest {
    fn id(&self) -> BlockId {
        block::CHEST
    }

    fn name(&self) -> &'static str {
        "chest"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE.interactable()
    }

    fn create_metadata(&self) -> Metadata {
        Metadata::new().with("items", Metadata::new())
    }

    fn handle_interaction(&self, action: &str, current: &Metadata, action_payload: &Metadata) -> Interaction {
        match action {
            "deposit" => Self::transfer(current, action_payload, true),
            "withdraw" => Self::transfer(current, action_payload, false),
            _ => Interaction::unchanged(block::CHEST, current),
        }
    }

    fn interact_with_player(&self, api: &mut dyn BlockApi, pos: BlockPos, player: EntityId) -> bool {
        api.set_block_metadata(pos, "opened_by", MetaValue::Int(player.0 as i64));
        true
    }
}
