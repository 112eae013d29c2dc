//! Seams to the systems around the world core.
//!
//! The world manager never talks to a socket or a database directly; it
//! calls these traits, which the embedding server implements.

use std::collections::HashMap;

use anyhow::Result;
use tilerealm_engine::entity::{Entity, EntityId};
use tilerealm_engine::world::block::{Block, BlockLayer};
use tilerealm_engine::world::chunk::Chunk;
use tilerealm_engine::world::position::{BigChunkPos, BlockPos};

/// Fan-out of committed block changes to connected clients.
pub trait NetworkManager: Send + Sync {
    fn send_block_update(&self, pos: BlockPos, layer: BlockLayer, block: &Block);
}

/// Entity (and optionally chunk) persistence, keyed by BigChunk.
pub trait EntityStorage: Send + Sync {
    fn save_entities(&self, big_chunk: BigChunkPos, entities: &[Entity]) -> Result<()>;

    /// `Ok(None)` when nothing was ever saved for this BigChunk.
    fn load_entities(&self, big_chunk: BigChunkPos) -> Result<Option<Vec<Entity>>>;

    /// Merge loaded entities into a fresh BigChunk's table.
    fn apply_entities(&self, entities: &mut HashMap<EntityId, Entity>, loaded: Vec<Entity>) {
        for entity in loaded {
            entities.insert(entity.id, entity);
        }
    }

    fn save_chunks(&self, _big_chunk: BigChunkPos, _chunks: &[Chunk]) -> Result<()> {
        Ok(())
    }

    /// `false` keeps chunk changes dirty instead of handing them to
    /// [`EntityStorage::save_chunks`].
    fn persists_chunks(&self) -> bool {
        true
    }
}
