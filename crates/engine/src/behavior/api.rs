use crate::world::block::{BlockId, BlockLayer};
use crate::world::meta::MetaValue;
use crate::world::position::BlockPos;
use rand::RngCore;

/// The only door block logic has into world state.
///
/// Implemented by the owner of the chunks (a BigChunk in the server). The
/// Active-layer shorthands and neighbor scheduling are provided in terms of
/// the layered primitives.
pub trait BlockApi {
    /// Reads take `&mut self` so the owner may generate a missing chunk on
    /// first touch.
    ///
    /// A cell owned elsewhere that cannot be seen right now reads as Air. A
    /// write to such a cell is guarded: it lands only if the cell still holds
    /// what this read returned.
    fn get_block_id_layer(&mut self, layer: BlockLayer, pos: BlockPos) -> BlockId;

    /// Like [`BlockApi::get_block_id_layer`], but `None` for a cell that
    /// cannot be seen right now instead of assuming Air.
    fn peek_block_id_layer(&mut self, layer: BlockLayer, pos: BlockPos) -> Option<BlockId>;

    /// Install a block, running the full place/break lifecycle for the
    /// Active layer.
    fn set_block_layer(&mut self, layer: BlockLayer, pos: BlockPos, id: BlockId);

    fn get_block_metadata_layer(&mut self, layer: BlockLayer, pos: BlockPos, key: &str) -> Option<MetaValue>;

    fn set_block_metadata_layer(&mut self, layer: BlockLayer, pos: BlockPos, key: &str, value: MetaValue);

    /// Queue exactly one re-evaluation of `pos` on the next tick, whether or
    /// not the block there normally ticks.
    fn schedule_update_once(&mut self, pos: BlockPos);

    /// Randomness source for behaviors (seeded per BigChunk).
    fn rng(&mut self) -> &mut dyn RngCore;

    fn get_block_id(&mut self, pos: BlockPos) -> BlockId {
        self.get_block_id_layer(BlockLayer::Active, pos)
    }

    fn peek_block_id(&mut self, pos: BlockPos) -> Option<BlockId> {
        self.peek_block_id_layer(BlockLayer::Active, pos)
    }

    fn set_block(&mut self, pos: BlockPos, id: BlockId) {
        self.set_block_layer(BlockLayer::Active, pos, id);
    }

    fn get_block_metadata(&mut self, pos: BlockPos, key: &str) -> Option<MetaValue> {
        self.get_block_metadata_layer(BlockLayer::Active, pos, key)
    }

    fn set_block_metadata(&mut self, pos: BlockPos, key: &str, value: MetaValue) {
        self.set_block_metadata_layer(BlockLayer::Active, pos, key, value);
    }

    /// Schedule the four orthogonal neighbors for a one-shot re-check.
    fn trigger_neighbor_updates(&mut self, pos: BlockPos) {
        for neighbor in pos.neighbors() {
            self.schedule_update_once(neighbor);
        }
    }
}
