use super::meta::Metadata;
use crate::behavior::BlockBehavior;
use crate::behavior::registry::BlockRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque block identifier. The engine stores these without interpreting them.
/// Game-specific layers assign meaning to specific IDs (e.g. 0 = air, 5 = water).
///
/// The only semantic the engine enforces is that `BlockId::AIR` (0) is the
/// "empty" block: reads from missing chunks or foreign positions return it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BlockId(pub u16);

impl BlockId {
    /// The universal "empty" block.
    pub const AIR: BlockId = BlockId(0);

    pub const fn new(id: u16) -> Self {
        Self(id)
    }
}

/// One of the three parallel state planes of a tile.
///
/// Only `Active` drives lifecycle callbacks, tick scheduling and
/// passability; `Floor` and `Ceiling` are inert data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockLayer {
    Floor,
    Active,
    Ceiling,
}

impl BlockLayer {
    pub const ALL: [BlockLayer; 3] = [BlockLayer::Floor, BlockLayer::Active, BlockLayer::Ceiling];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            BlockLayer::Floor => 0,
            BlockLayer::Active => 1,
            BlockLayer::Ceiling => 2,
        }
    }
}

/// A block instance: its type plus the per-instance payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub payload: Metadata,
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            payload: Metadata::new(),
        }
    }

    pub fn with_payload(id: BlockId, payload: Metadata) -> Self {
        Self { id, payload }
    }

    pub fn air() -> Self {
        Self::new(BlockId::AIR)
    }

    /// The behavior registered for this block's ID, if any.
    pub fn behavior<'r>(&self, registry: &'r BlockRegistry) -> Option<&'r Arc<dyn BlockBehavior>> {
        registry.get(self.id)
    }
}
