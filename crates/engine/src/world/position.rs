use serde::{Deserialize, Serialize};

/// log2 of the chunk edge length in tiles.
pub const CHUNK_SHIFT: u32 = 4;
/// log2 of the BigChunk edge length in chunks.
pub const BIG_CHUNK_SHIFT: u32 = 5;
/// Chunks along each axis of a BigChunk.
pub const BIG_CHUNK_CHUNKS: i32 = 1 << BIG_CHUNK_SHIFT;
/// Tiles along each axis of a BigChunk (32 chunks x 16 tiles).
pub const BIG_CHUNK_TILES: i32 = BIG_CHUNK_CHUNKS << CHUNK_SHIFT;

/// Absolute tile position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The chunk this tile belongs to.
    pub const fn chunk(&self) -> ChunkPos {
        ChunkPos {
            x: self.x >> CHUNK_SHIFT,
            y: self.y >> CHUNK_SHIFT,
        }
    }

    /// Position within the chunk (0..16 each axis).
    pub const fn local(&self) -> LocalPos {
        LocalPos {
            x: (self.x & 0xF) as u8,
            y: (self.y & 0xF) as u8,
        }
    }

    /// The BigChunk that owns this tile.
    pub const fn big_chunk(&self) -> BigChunkPos {
        self.chunk().big_chunk()
    }

    /// The four orthogonal neighbors (+X, -X, +Y, -Y).
    pub const fn neighbors(&self) -> [BlockPos; 4] {
        [
            Self::new(self.x + 1, self.y),
            Self::new(self.x - 1, self.y),
            Self::new(self.x, self.y + 1),
            Self::new(self.x, self.y - 1),
        ]
    }

    /// Center of the tile in continuous coordinates.
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x as f32 + 0.5, self.y as f32 + 0.5)
    }
}

/// Chunk position (each chunk is 16x16 tiles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn big_chunk(&self) -> BigChunkPos {
        BigChunkPos {
            x: self.x >> BIG_CHUNK_SHIFT,
            y: self.y >> BIG_CHUNK_SHIFT,
        }
    }

    /// Tile position of the chunk's (0, 0) corner.
    pub const fn block_origin(&self) -> BlockPos {
        BlockPos::new(self.x << CHUNK_SHIFT, self.y << CHUNK_SHIFT)
    }

    /// Absolute position of a tile inside this chunk.
    pub const fn block_at(&self, local: LocalPos) -> BlockPos {
        BlockPos::new(
            (self.x << CHUNK_SHIFT) + local.x as i32,
            (self.y << CHUNK_SHIFT) + local.y as i32,
        )
    }
}

/// Tile position local to a chunk (x, y in 0..16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalPos {
    pub x: u8,
    pub y: u8,
}

impl LocalPos {
    /// Masks the coordinates into range, so any `u8` pair is accepted.
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x: x & 0xF, y: y & 0xF }
    }

    #[inline]
    pub(crate) const fn index(&self) -> usize {
        (self.y as usize) * 16 + (self.x as usize)
    }
}

/// Coordinate of a BigChunk (32x32 chunks, 512x512 tiles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BigChunkPos {
    pub x: i32,
    pub y: i32,
}

impl BigChunkPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn contains_chunk(&self, chunk: ChunkPos) -> bool {
        let owner = chunk.big_chunk();
        owner.x == self.x && owner.y == self.y
    }

    pub const fn contains_block(&self, pos: BlockPos) -> bool {
        self.contains_chunk(pos.chunk())
    }

    pub const fn block_origin(&self) -> BlockPos {
        BlockPos::new(self.x * BIG_CHUNK_TILES, self.y * BIG_CHUNK_TILES)
    }
}

/// Continuous 2D position or extent, in tile units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// The tile containing this point.
    pub fn tile(&self) -> BlockPos {
        BlockPos::new(self.x.floor() as i32, self.y.floor() as i32)
    }

    pub fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn scale(self, factor: f32) -> Vec2 {
        Vec2::new(self.x * factor, self.y * factor)
    }

    pub fn distance_squared(&self, other: Vec2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn length_squared(&self) -> f32 {
        self.x * self.x + self.y * self.y
    }
}

/// Axis-aligned bounding box, `[min, max)` on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Box of extent `size` centered on `center`.
    pub fn centered(center: Vec2, size: Vec2) -> Self {
        let half = size.scale(0.5);
        Self {
            min: Vec2::new(center.x - half.x, center.y - half.y),
            max: Vec2::new(center.x + half.x, center.y + half.y),
        }
    }

    /// Strict overlap: boxes that only touch along an edge do not overlap.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    /// Every tile the box covers.
    pub fn tiles(&self) -> impl Iterator<Item = BlockPos> {
        let min_x = self.min.x.floor() as i32;
        let min_y = self.min.y.floor() as i32;
        let max_x = (self.max.x.ceil() as i32).saturating_sub(1).max(min_x);
        let max_y = (self.max.y.ceil() as i32).saturating_sub(1).max(min_y);
        (min_y..=max_y).flat_map(move |y| (min_x..=max_x).map(move |x| BlockPos::new(x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_tiles_floor_into_chunks() {
        let pos = BlockPos::new(-1, -17);
        assert_eq!(pos.chunk(), ChunkPos::new(-1, -2));
        assert_eq!(pos.local(), LocalPos::new(15, 15));
        assert_eq!(pos.big_chunk(), BigChunkPos::new(-1, -1));
    }

    #[test]
    fn big_chunk_spans_512_tiles() {
        assert_eq!(BlockPos::new(511, 0).big_chunk(), BigChunkPos::new(0, 0));
        assert_eq!(BlockPos::new(512, 0).big_chunk(), BigChunkPos::new(1, 0));
        assert_eq!(BigChunkPos::new(1, -1).block_origin(), BlockPos::new(512, -512));
    }

    #[test]
    fn aabb_tiles_of_unit_box() {
        let tiles: Vec<_> = Aabb::centered(Vec2::new(3.5, 4.5), Vec2::new(1.0, 1.0))
            .tiles()
            .collect();
        assert_eq!(tiles, vec![BlockPos::new(3, 4)]);
    }
}
