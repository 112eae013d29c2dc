//! Messages carried by the bounded queues, and the non-blocking send that
//! every producer goes through.

use tilerealm_engine::entity::{Entity, EntityId};
use tilerealm_engine::world::block::{Block, BlockId, BlockLayer};
use tilerealm_engine::world::chunk::Chunk;
use tilerealm_engine::world::meta::{MetaValue, Metadata};
use tilerealm_engine::world::position::{BigChunkPos, BlockPos, Vec2};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::event_bus::ChangeSource;
use crate::metrics::{Metrics, QueueKind};

/// One cell's new contents.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockChange {
    pub pos: BlockPos,
    pub layer: BlockLayer,
    pub block: Block,
}

/// Inbound to a BigChunk.
#[derive(Debug, Clone)]
pub enum BigChunkEvent {
    Block(BlockEvent),
    Entity(EntityEvent),
    /// Snapshot entities to the world manager, and dirty chunks too when
    /// `chunks` is set.
    Save { chunks: bool },
    /// Run one tick now, in queue order.
    Tick,
}

/// `expected` on a write guards it: the owner drops the write unless the
/// cell still holds that block. `None` writes unconditionally.
#[derive(Debug, Clone)]
pub enum BlockEvent {
    /// Install a block through the full place/break lifecycle.
    Change {
        pos: BlockPos,
        layer: BlockLayer,
        block: Block,
        expected: Option<BlockId>,
    },
    /// Route an action through the Active block's `handle_interaction`.
    Interact { pos: BlockPos, action: String, payload: Metadata },
    /// Direct player use of an interactable block.
    PlayerInteract { pos: BlockPos, player: EntityId },
    /// One-shot re-check of a cell on the next tick.
    ScheduleOnce { pos: BlockPos },
    /// Set one metadata key without changing the block.
    Metadata {
        pos: BlockPos,
        layer: BlockLayer,
        key: String,
        value: MetaValue,
        expected: Option<BlockId>,
    },
}

impl BlockEvent {
    /// The cell the event targets; decides the owning BigChunk.
    pub fn pos(&self) -> BlockPos {
        match self {
            BlockEvent::Change { pos, .. }
            | BlockEvent::Interact { pos, .. }
            | BlockEvent::PlayerInteract { pos, .. }
            | BlockEvent::ScheduleOnce { pos }
            | BlockEvent::Metadata { pos, .. } => *pos,
        }
    }

    /// An unguarded write of `block`.
    pub fn change(pos: BlockPos, layer: BlockLayer, block: Block) -> Self {
        BlockEvent::Change {
            pos,
            layer,
            block,
            expected: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum EntityEvent {
    Spawn(Entity),
    Despawn { id: EntityId },
    Move { id: EntityId, position: Vec2 },
    /// `"damage"` lowers health (removing the entity at zero), `"heal"`
    /// raises it.
    Interact { id: EntityId, action: String, amount: f64 },
}

/// Outbound from BigChunks to the world manager.
#[derive(Debug)]
pub enum WorldEvent {
    ChunksSaved { origin: BigChunkPos, chunks: Vec<Chunk> },
    EntitiesSaved { origin: BigChunkPos, entities: Vec<Entity> },
    /// A behavior wrote outside its own BigChunk. `expected` is what the
    /// behavior saw in that cell when it decided to write.
    ForeignBlock {
        origin: BigChunkPos,
        change: BlockChange,
        expected: Option<BlockId>,
    },
    ForeignMetadata {
        origin: BigChunkPos,
        pos: BlockPos,
        layer: BlockLayer,
        key: String,
        value: MetaValue,
        expected: Option<BlockId>,
    },
    ForeignSchedule { origin: BigChunkPos, pos: BlockPos },
    /// Changes made while processing a tick or queued event.
    BlocksChanged { origin: BigChunkPos, source: ChangeSource, changes: Vec<BlockChange> },
    /// A routed spawn was accepted.
    EntitySpawned { origin: BigChunkPos, entity: Entity },
    EntityMoved { origin: BigChunkPos, id: EntityId, from: Vec2, to: Vec2 },
    EntityRemoved { origin: BigChunkPos, id: EntityId, position: Vec2 },
}

/// Outcome of a non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Enqueued,
    /// The queue was full; the event is gone.
    DroppedFull,
    /// The receiver has shut down.
    Closed,
}

impl Enqueue {
    pub fn is_enqueued(self) -> bool {
        self == Enqueue::Enqueued
    }
}

/// Send without waiting. A full queue drops the event, logs it and counts
/// it against `queue`.
pub fn try_enqueue<T>(tx: &mpsc::Sender<T>, event: T, queue: QueueKind, metrics: &Metrics) -> Enqueue {
    match tx.try_send(event) {
        Ok(()) => {
            metrics.event_enqueued(queue);
            Enqueue::Enqueued
        }
        Err(TrySendError::Full(_)) => {
            metrics.event_dropped(queue);
            tracing::warn!("{:?} full, event dropped", queue);
            Enqueue::DroppedFull
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!("{:?} closed, event discarded", queue);
            Enqueue::Closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let metrics = Metrics::new();
        let (tx, mut rx) = mpsc::channel::<u32>(1);
        assert_eq!(try_enqueue(&tx, 1, QueueKind::WorldOutbox, &metrics), Enqueue::Enqueued);
        assert_eq!(try_enqueue(&tx, 2, QueueKind::WorldOutbox, &metrics), Enqueue::DroppedFull);
        assert_eq!(metrics.dropped(QueueKind::WorldOutbox), 1);
        assert_eq!(metrics.dropped(QueueKind::BigChunkInbox), 0);
        assert_eq!(rx.recv().await, Some(1));

        drop(rx);
        assert_eq!(try_enqueue(&tx, 3, QueueKind::WorldOutbox, &metrics), Enqueue::Closed);
    }
}
