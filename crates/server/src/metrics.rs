//! Lock-free world counters.
//!
//! BigChunk actors and the world loop bump these with relaxed atomics; the
//! demo and tests read them through [`Metrics::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::Instant;

/// The bounded queues whose traffic is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// A BigChunk's inbound event queue.
    BigChunkInbox,
    /// The shared queue from BigChunks back to the world manager.
    WorldOutbox,
}

impl QueueKind {
    const fn slot(self) -> usize {
        match self {
            QueueKind::BigChunkInbox => 0,
            QueueKind::WorldOutbox => 1,
        }
    }
}

pub struct Metrics {
    enqueued: [AtomicU64; 2],
    dropped: [AtomicU64; 2],
    ticks: AtomicU64,
    block_updates: AtomicU64,
    saves: AtomicU64,
    relocations: AtomicU64,
    entity_moves: AtomicU64,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            enqueued: [AtomicU64::new(0), AtomicU64::new(0)],
            dropped: [AtomicU64::new(0), AtomicU64::new(0)],
            ticks: AtomicU64::new(0),
            block_updates: AtomicU64::new(0),
            saves: AtomicU64::new(0),
            relocations: AtomicU64::new(0),
            entity_moves: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn event_enqueued(&self, queue: QueueKind) {
        self.enqueued[queue.slot()].fetch_add(1, Relaxed);
    }

    pub fn event_dropped(&self, queue: QueueKind) {
        self.dropped[queue.slot()].fetch_add(1, Relaxed);
    }

    pub fn dropped(&self, queue: QueueKind) -> u64 {
        self.dropped[queue.slot()].load(Relaxed)
    }

    /// One BigChunk tick and the number of block callbacks it ran.
    pub fn record_tick(&self, block_updates: u64) {
        self.ticks.fetch_add(1, Relaxed);
        self.block_updates.fetch_add(block_updates, Relaxed);
    }

    pub fn save_issued(&self) {
        self.saves.fetch_add(1, Relaxed);
    }

    pub fn entity_relocated(&self) {
        self.relocations.fetch_add(1, Relaxed);
    }

    pub fn entities_moved(&self, count: u64) {
        self.entity_moves.fetch_add(count, Relaxed);
    }

    pub fn snapshot(&self, big_chunks: u64, entities: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            big_chunks,
            entities,
            ticks: self.ticks.load(Relaxed),
            block_updates: self.block_updates.load(Relaxed),
            saves: self.saves.load(Relaxed),
            relocations: self.relocations.load(Relaxed),
            entity_moves: self.entity_moves.load(Relaxed),
            inbox_enqueued: self.enqueued[0].load(Relaxed),
            inbox_dropped: self.dropped[0].load(Relaxed),
            outbox_enqueued: self.enqueued[1].load(Relaxed),
            outbox_dropped: self.dropped[1].load(Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable point-in-time copy of every counter.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub big_chunks: u64,
    pub entities: u64,
    pub ticks: u64,
    pub block_updates: u64,
    pub saves: u64,
    pub relocations: u64,
    pub entity_moves: u64,
    pub inbox_enqueued: u64,
    pub inbox_dropped: u64,
    pub outbox_enqueued: u64,
    pub outbox_dropped: u64,
}
