//! Block behaviors: one stateless singleton per block type.
//!
//! A block *type* is a [`BlockBehavior`] registered once in a
//! [`registry::BlockRegistry`]; a block *instance* is just a `(BlockId,
//! Metadata)` pair stored in a chunk. Behaviors never hold references to
//! chunks -- every world access goes through the [`api::BlockApi`] facade
//! handed to the callback.

pub mod api;
pub mod registry;

use crate::entity::EntityId;
use crate::world::block::BlockId;
use crate::world::meta::Metadata;
use crate::world::position::BlockPos;
use api::BlockApi;

/// What a behavior supports, read once when it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Receives `tick_update` every tick while placed on the Active layer.
    pub tickable: bool,
    /// Reacts to [`BlockBehavior::interact_with_player`].
    pub interactable: bool,
    /// Entities may stand in the cell.
    pub passable: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        tickable: false,
        interactable: false,
        passable: false,
    };

    pub const fn tickable(mut self) -> Self {
        self.tickable = true;
        self
    }

    pub const fn interactable(mut self) -> Self {
        self.interactable = true;
        self
    }

    pub const fn passable(mut self) -> Self {
        self.passable = true;
        self
    }
}

/// Outcome flags of an interaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InteractionResult {
    pub success: bool,
    /// Free-form side effects for the caller (e.g. `"drop:stone"`).
    pub effects: Vec<String>,
    pub message: Option<String>,
}

/// The block an interaction leaves behind, plus what happened.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub block: BlockId,
    pub payload: Metadata,
    pub result: InteractionResult,
}

impl Interaction {
    /// Nothing happened: same block, same payload, `success = false`.
    pub fn unchanged(block: BlockId, payload: &Metadata) -> Self {
        Self {
            block,
            payload: payload.clone(),
            result: InteractionResult::default(),
        }
    }

    /// Same block type with an updated payload.
    pub fn updated(block: BlockId, payload: Metadata, effects: Vec<String>) -> Self {
        Self {
            block,
            payload,
            result: InteractionResult {
                success: true,
                effects,
                message: None,
            },
        }
    }

    /// The block turns into another type.
    pub fn transformed(block: BlockId, payload: Metadata, effects: Vec<String>) -> Self {
        Self::updated(block, payload, effects)
    }

    /// The interaction was understood but refused.
    pub fn refused(block: BlockId, payload: &Metadata, message: impl Into<String>) -> Self {
        Self {
            block,
            payload: payload.clone(),
            result: InteractionResult {
                success: false,
                effects: Vec::new(),
                message: Some(message.into()),
            },
        }
    }
}

/// The behavior of one block type.
///
/// Implementations are stateless singletons shared across every world that
/// registers them; all per-instance state lives in the cell's metadata.
pub trait BlockBehavior: Send + Sync {
    fn id(&self) -> BlockId;

    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    fn needs_tick(&self) -> bool {
        self.capabilities().tickable
    }

    /// Initial payload for a freshly placed instance.
    fn create_metadata(&self) -> Metadata {
        Metadata::new()
    }

    /// Periodic (tickable blocks) or one-shot (scheduled re-check) update.
    fn tick_update(&self, _api: &mut dyn BlockApi, _pos: BlockPos) {}

    /// Called after this block was installed on the Active layer.
    fn on_place(&self, _api: &mut dyn BlockApi, _pos: BlockPos) {}

    /// Called before this block is replaced on the Active layer.
    fn on_break(&self, _api: &mut dyn BlockApi, _pos: BlockPos) {}

    /// Universal entry point for player/tool actions. `action` and
    /// `action_payload` are interpreted by the behavior itself.
    fn handle_interaction(&self, _action: &str, current: &Metadata, _action_payload: &Metadata) -> Interaction {
        Interaction::unchanged(self.id(), current)
    }

    /// Direct player interaction; only dispatched when the behavior declares
    /// [`Capabilities::interactable`]. Returns whether anything happened.
    fn interact_with_player(&self, _api: &mut dyn BlockApi, _pos: BlockPos, _player: EntityId) -> bool {
        false
    }
}
