//! World-change event bus.
//!
//! Every committed change (API writes, routed events, ticks, relocations)
//! is published as a [`WorldChangeBatch`] on a shared
//! `tokio::sync::broadcast` channel. Subscribers that fall behind lose the
//! oldest batches; nothing here ever blocks the simulation.

use std::sync::Arc;

use tilerealm_engine::entity::EntityId;
use tilerealm_engine::world::position::{BigChunkPos, Vec2};
use tokio::sync::broadcast;

use crate::events::BlockChange;

/// 256 batches in flight absorbs bursts without lagging subscribers.
pub const BUS_CAPACITY: usize = 256;

/// Where a batch of changes came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeSource {
    /// A synchronous world-manager call.
    Api,
    /// A queued event applied by a BigChunk.
    Routed(BigChunkPos),
    /// A BigChunk tick.
    Tick(BigChunkPos),
    /// The region simulation.
    Simulation,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WorldChange {
    Block(BlockChange),
    EntitySpawned { id: EntityId, big_chunk: BigChunkPos, position: Vec2 },
    EntityDespawned { id: EntityId, big_chunk: BigChunkPos, position: Vec2 },
    EntityMoved { id: EntityId, from: Vec2, to: Vec2 },
}

/// Uses `Arc<[...]>` so cloning per subscriber is a refcount bump.
#[derive(Clone, Debug)]
pub struct WorldChangeBatch {
    pub source: ChangeSource,
    pub changes: Arc<[WorldChange]>,
}

/// Publish a batch; empty batches and "no subscribers" are both fine.
pub fn publish(bus: &broadcast::Sender<WorldChangeBatch>, source: ChangeSource, changes: Vec<WorldChange>) {
    if changes.is_empty() {
        return;
    }
    let _ = bus.send(WorldChangeBatch {
        source,
        changes: changes.into(),
    });
}
