//! World generation: noise-driven biomes and a flat debug world.
//!
//! Terrain sits on the Floor layer; water, plants, trees and boulders go on
//! Active, tree canopies on Ceiling. Everything derived from randomness uses
//! a per-chunk RNG seeded from the world seed and chunk coordinate, so the
//! same seed always reproduces the same chunk.

use noise::{NoiseFn, Perlin};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tilerealm_engine::behavior::registry::BlockRegistry;
use tilerealm_engine::world::ChunkGenerator;
use tilerealm_engine::world::block::{BlockId, BlockLayer};
use tilerealm_engine::world::chunk::{CHUNK_SIZE, Chunk};
use tilerealm_engine::world::position::{ChunkPos, LocalPos};

use crate::block;

const ELEVATION_SCALE: f64 = 0.008;
const CLIMATE_SCALE: f64 = 0.004;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Biome {
    DeepOcean,
    Ocean,
    Beach,
    Plains,
    Forest,
    Desert,
    Mountain,
}

pub struct TerrainGenerator {
    seed: u64,
    elevation: Perlin,
    temperature: Perlin,
    moisture: Perlin,
}

impl TerrainGenerator {
    pub fn new(seed: u64) -> Self {
        let base = seed as u32;
        Self {
            seed,
            elevation: Perlin::new(base),
            temperature: Perlin::new(base.wrapping_add(1)),
            moisture: Perlin::new(base.wrapping_add(2)),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// `seed + x*31 + y*17`.
    fn chunk_rng(&self, pos: ChunkPos) -> SmallRng {
        let mix = (pos.x as i64)
            .wrapping_mul(31)
            .wrapping_add((pos.y as i64).wrapping_mul(17));
        SmallRng::seed_from_u64(self.seed.wrapping_add(mix as u64))
    }

    fn elevation_at(&self, x: i32, y: i32) -> f64 {
        let (fx, fy) = (x as f64, y as f64);
        let broad = self.elevation.get([fx * ELEVATION_SCALE, fy * ELEVATION_SCALE]);
        let detail = self.elevation.get([fx * ELEVATION_SCALE * 4.0 + 100.0, fy * ELEVATION_SCALE * 4.0]);
        broad * 0.8 + detail * 0.2
    }

    pub fn biome_at(&self, x: i32, y: i32) -> Biome {
        let elevation = self.elevation_at(x, y);
        if elevation < -0.35 {
            return Biome::DeepOcean;
        }
        if elevation < -0.1 {
            return Biome::Ocean;
        }
        if elevation < -0.04 {
            return Biome::Beach;
        }
        if elevation > 0.45 {
            return Biome::Mountain;
        }

        let (fx, fy) = (x as f64 * CLIMATE_SCALE, y as f64 * CLIMATE_SCALE);
        let temperature = self.temperature.get([fx, fy]);
        let moisture = self.moisture.get([fx, fy]);
        if temperature > 0.3 && moisture < 0.0 {
            Biome::Desert
        } else if moisture > 0.15 {
            Biome::Forest
        } else {
            Biome::Plains
        }
    }
}

/// Install a generated block, seeding its default metadata on the Active
/// layer.
fn place(chunk: &mut Chunk, layer: BlockLayer, local: LocalPos, id: BlockId, registry: &BlockRegistry) {
    chunk.set_block_layer(layer, local, id, registry);
    if layer != BlockLayer::Active {
        return;
    }
    if let Some(behavior) = registry.get(id) {
        let meta = behavior.create_metadata();
        if !meta.is_empty() {
            chunk.set_block_metadata_layer(layer, local, &meta);
        }
    }
}

impl ChunkGenerator for TerrainGenerator {
    fn generate_chunk(&self, pos: ChunkPos, registry: &BlockRegistry) -> Chunk {
        let mut chunk = Chunk::new(pos);
        let mut rng = self.chunk_rng(pos);

        for ly in 0..CHUNK_SIZE as u8 {
            for lx in 0..CHUNK_SIZE as u8 {
                let local = LocalPos::new(lx, ly);
                let world = pos.block_at(local);
                let roll: f64 = rng.gen_range(0.0..1.0);

                let (floor, active) = match self.biome_at(world.x, world.y) {
                    Biome::DeepOcean => (block::SAND, Some(block::DEEP_WATER)),
                    Biome::Ocean => (block::SAND, Some(block::WATER)),
                    Biome::Beach | Biome::Desert => (block::SAND, None),
                    Biome::Plains => (
                        block::GRASS,
                        match roll {
                            r if r < 0.01 => Some(block::FLOWER),
                            r if r < 0.04 => Some(block::TALL_GRASS),
                            _ => None,
                        },
                    ),
                    Biome::Forest => (
                        block::GRASS,
                        match roll {
                            r if r < 0.08 => Some(block::TREE),
                            r if r < 0.11 => Some(block::TALL_GRASS),
                            _ => None,
                        },
                    ),
                    Biome::Mountain => {
                        let peak = self.elevation_at(world.x, world.y) > 0.6;
                        (block::STONE, (peak || roll < 0.1).then_some(block::STONE))
                    }
                };

                place(&mut chunk, BlockLayer::Floor, local, floor, registry);
                if let Some(id) = active {
                    place(&mut chunk, BlockLayer::Active, local, id, registry);
                    if id == block::TREE {
                        place(&mut chunk, BlockLayer::Ceiling, local, block::TREE_CANOPY, registry);
                    }
                }
            }
        }

        chunk.mark_clean();
        chunk
    }
}

/// Grass floor everywhere, nothing on top.
pub struct FlatGenerator;

impl ChunkGenerator for FlatGenerator {
    fn generate_chunk(&self, pos: ChunkPos, registry: &BlockRegistry) -> Chunk {
        let mut chunk = Chunk::new(pos);
        chunk.fill_layer(BlockLayer::Floor, block::GRASS, registry);
        chunk.mark_clean();
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layers(chunk: &Chunk) -> Vec<BlockId> {
        let mut ids = Vec::new();
        for layer in BlockLayer::ALL {
            for y in 0..CHUNK_SIZE as u8 {
                for x in 0..CHUNK_SIZE as u8 {
                    ids.push(chunk.get_block_layer(layer, LocalPos::new(x, y)));
                }
            }
        }
        ids
    }

    #[test]
    fn same_seed_same_chunk() {
        let registry = block::standard_registry();
        let a = TerrainGenerator::new(1234);
        let b = TerrainGenerator::new(1234);
        for pos in [ChunkPos::new(0, 0), ChunkPos::new(-7, 3), ChunkPos::new(40, -40)] {
            let first = a.generate_chunk(pos, &registry);
            let second = b.generate_chunk(pos, &registry);
            assert_eq!(layers(&first), layers(&second));
            assert!(!first.is_dirty());
        }
    }

    #[test]
    fn generated_water_carries_level() {
        let registry = block::standard_registry();
        let generator = TerrainGenerator::new(7);
        // Scan until an ocean chunk turns up.
        for cx in 0..64 {
            let chunk = generator.generate_chunk(ChunkPos::new(cx, 0), &registry);
            for y in 0..CHUNK_SIZE as u8 {
                for x in 0..CHUNK_SIZE as u8 {
                    let local = LocalPos::new(x, y);
                    if chunk.get_block(local) == block::WATER {
                        assert_eq!(
                            chunk.metadata_value(BlockLayer::Active, local, "level").and_then(|v| v.as_int()),
                            Some(block::MAX_WATER_LEVEL)
                        );
                        return;
                    }
                }
            }
        }
    }

    #[test]
    fn flat_world_is_grass_floor() {
        let registry = block::standard_registry();
        let chunk = FlatGenerator.generate_chunk(ChunkPos::new(2, 2), &registry);
        assert_eq!(chunk.count_non_air(BlockLayer::Floor), CHUNK_SIZE * CHUNK_SIZE);
        assert_eq!(chunk.count_non_air(BlockLayer::Active), 0);
        assert_eq!(chunk.tickable_positions().count(), 0);
    }
}
