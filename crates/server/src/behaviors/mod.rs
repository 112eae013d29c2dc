//! Concrete block behaviors.
//!
//! Every type here is a stateless unit-ish struct registered once in
//! [`crate::block::standard_registry`]. Instance state lives in the cell's
//! metadata and is only reached through the `BlockApi` handed to callbacks.

pub mod decor;
pub mod fluid;
pub mod interactive;
pub mod terrain;

use tilerealm_engine::world::meta::Metadata;

/// `drop:<item>` effect string.
pub(crate) fn drop_effect(item: &str) -> String {
    format!("drop:{item}")
}

/// Does the action payload name this tool?
pub(crate) fn uses_tool(action_payload: &Metadata, tool: &str) -> bool {
    action_payload.get_str("tool") == Some(tool)
}
