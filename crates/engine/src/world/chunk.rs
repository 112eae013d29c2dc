use super::block::{Block, BlockId, BlockLayer};
use super::meta::{MetaValue, Metadata};
use super::position::{BlockPos, ChunkPos, LocalPos};
use crate::behavior::registry::BlockRegistry;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Number of tiles along each axis of a chunk.
pub const CHUNK_SIZE: usize = 16;
/// Total tile count in one layer of a chunk.
const CHUNK_AREA: usize = CHUNK_SIZE * CHUNK_SIZE;
const LAYER_COUNT: usize = 3;

/// Addresses one cell of one layer.
pub type CellKey = (BlockLayer, LocalPos);

/// A 16x16 grid of tiles, replicated across the floor/active/ceiling layers.
///
/// Besides the IDs a chunk tracks per-cell metadata, a dirty set for
/// persistence, and the set of Active cells whose block needs periodic ticks.
/// All accessors take chunk-local coordinates; callers convert with
/// [`BlockPos::local`].
#[derive(Clone)]
pub struct Chunk {
    pos: ChunkPos,
    blocks: Box<[[BlockId; CHUNK_AREA]; LAYER_COUNT]>,
    metadata: HashMap<CellKey, Metadata>,
    changes: HashSet<CellKey>,
    tickable: HashSet<CellKey>,
}

impl Chunk {
    /// An all-air chunk.
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            blocks: Box::new([[BlockId::AIR; CHUNK_AREA]; LAYER_COUNT]),
            metadata: HashMap::new(),
            changes: HashSet::new(),
            tickable: HashSet::new(),
        }
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    #[inline]
    pub fn get_block_layer(&self, layer: BlockLayer, local: LocalPos) -> BlockId {
        self.blocks[layer.index()][local.index()]
    }

    #[inline]
    pub fn get_block(&self, local: LocalPos) -> BlockId {
        self.get_block_layer(BlockLayer::Active, local)
    }

    /// Overwrite one cell and mark it dirty. Returns the previous ID.
    ///
    /// For the Active layer the tickable flag is recomputed from the new
    /// block's registered capabilities; the other layers never tick.
    pub fn set_block_layer(
        &mut self,
        layer: BlockLayer,
        local: LocalPos,
        id: BlockId,
        registry: &BlockRegistry,
    ) -> BlockId {
        let cell = &mut self.blocks[layer.index()][local.index()];
        let old = std::mem::replace(cell, id);
        self.changes.insert((layer, local));

        if layer == BlockLayer::Active {
            if registry.needs_tick(id) {
                self.tickable.insert((layer, local));
            } else {
                self.tickable.remove(&(layer, local));
            }
        }
        old
    }

    pub fn set_block(&mut self, local: LocalPos, id: BlockId, registry: &BlockRegistry) -> BlockId {
        self.set_block_layer(BlockLayer::Active, local, id, registry)
    }

    /// Fill an entire layer with one block (generation helper).
    pub fn fill_layer(&mut self, layer: BlockLayer, id: BlockId, registry: &BlockRegistry) {
        for y in 0..CHUNK_SIZE as u8 {
            for x in 0..CHUNK_SIZE as u8 {
                self.set_block_layer(layer, LocalPos::new(x, y), id, registry);
            }
        }
    }

    pub fn block_metadata_layer(&self, layer: BlockLayer, local: LocalPos) -> Option<&Metadata> {
        self.metadata.get(&(layer, local))
    }

    pub fn metadata_value(&self, layer: BlockLayer, local: LocalPos, key: &str) -> Option<&MetaValue> {
        self.block_metadata_layer(layer, local).and_then(|m| m.get(key))
    }

    /// Merge `meta` into the cell's metadata (never replaces wholesale).
    pub fn set_block_metadata_layer(&mut self, layer: BlockLayer, local: LocalPos, meta: &Metadata) {
        self.metadata.entry((layer, local)).or_default().merge(meta);
        self.changes.insert((layer, local));
    }

    pub fn set_metadata_value(
        &mut self,
        layer: BlockLayer,
        local: LocalPos,
        key: &str,
        value: MetaValue,
    ) {
        self.metadata.entry((layer, local)).or_default().set(key, value);
        self.changes.insert((layer, local));
    }

    /// Drop all metadata of a cell. Used when a cell changes block type.
    pub fn clear_metadata_layer(&mut self, layer: BlockLayer, local: LocalPos) {
        if self.metadata.remove(&(layer, local)).is_some() {
            self.changes.insert((layer, local));
        }
    }

    /// The block ID plus a copy of its metadata.
    pub fn block_at(&self, layer: BlockLayer, local: LocalPos) -> Block {
        Block::with_payload(
            self.get_block_layer(layer, local),
            self.block_metadata_layer(layer, local).cloned().unwrap_or_default(),
        )
    }

    pub fn is_tickable(&self, layer: BlockLayer, local: LocalPos) -> bool {
        self.tickable.contains(&(layer, local))
    }

    /// Absolute positions of every Active cell that needs ticks.
    pub fn tickable_positions(&self) -> impl Iterator<Item = BlockPos> + '_ {
        self.tickable
            .iter()
            .filter(|(layer, _)| *layer == BlockLayer::Active)
            .map(|(_, local)| self.pos.block_at(*local))
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Drain and return every cell modified since the last call.
    pub fn take_changes(&mut self) -> Vec<CellKey> {
        self.changes.drain().collect()
    }

    /// Put back cells returned by [`Chunk::take_changes`] whose save failed.
    pub fn restore_changes(&mut self, cells: impl IntoIterator<Item = CellKey>) {
        self.changes.extend(cells);
    }

    /// Forget pending changes (e.g. right after generation).
    pub fn mark_clean(&mut self) {
        self.changes.clear();
    }

    /// Number of non-air cells in a layer.
    pub fn count_non_air(&self, layer: BlockLayer) -> usize {
        self.blocks[layer.index()]
            .iter()
            .filter(|b| **b != BlockId::AIR)
            .count()
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("pos", &self.pos)
            .field("active_blocks", &self.count_non_air(BlockLayer::Active))
            .field("tickable", &self.tickable.len())
            .field("changes", &self.changes.len())
            .finish()
    }
}
