pub mod block;
pub mod chunk;
pub mod meta;
pub mod position;

use crate::behavior::registry::BlockRegistry;
use chunk::Chunk;
use position::ChunkPos;

/// Deterministic chunk factory, consulted the first time a chunk is touched.
///
/// Implementations must return the same chunk for the same seed and
/// coordinate. The registry is passed so generated cells get their tickable
/// flags and default metadata just like placed ones.
pub trait ChunkGenerator: Send + Sync {
    fn generate_chunk(&self, pos: ChunkPos, registry: &BlockRegistry) -> Chunk;
}

