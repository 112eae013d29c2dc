//! BigChunk: the unit of ownership and concurrency.
//!
//! A BigChunk owns a 32x32 grid of chunks plus every entity positioned in
//! it. Each one runs as its own tokio task that multiplexes three inputs:
//! cancellation, its inbound event queue, and a fixed-rate ticker.
//!
//! All state sits behind one `RwLock`. The actor task and synchronous
//! callers (the world manager's get/set path) take the same lock, so an
//! operation is always applied whole. Between the two paths only one order
//! is promised: an event enqueued after a synchronous call returned is
//! applied after that call.
//!
//! A BigChunk never waits on another BigChunk's lock. Behaviors see across
//! the border with `try_read`, and their writes across it travel as guarded
//! events that the owner re-checks before applying.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use tilerealm_engine::behavior::InteractionResult;
use tilerealm_engine::behavior::api::BlockApi;
use tilerealm_engine::behavior::registry::BlockRegistry;
use tilerealm_engine::entity::{Entity, EntityId, EntityKind};
use tilerealm_engine::world::ChunkGenerator;
use tilerealm_engine::world::block::{Block, BlockId, BlockLayer};
use tilerealm_engine::world::chunk::{CellKey, Chunk};
use tilerealm_engine::world::meta::{MetaValue, Metadata};
use tilerealm_engine::world::position::{BigChunkPos, BlockPos, ChunkPos, Vec2};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::event_bus::ChangeSource;
use crate::events::{BigChunkEvent, BlockChange, BlockEvent, Enqueue, EntityEvent, WorldEvent, try_enqueue};
use crate::metrics::{Metrics, QueueKind};

/// Nested set-block calls from behavior callbacks deeper than this are
/// skipped.
pub const MAX_CASCADE_DEPTH: u32 = 64;
/// Events drained after a tick before yielding back to the select loop.
const MAX_DRAIN: usize = 256;
/// NPCs consider a step once per this many ticks.
const WANDER_PERIOD: u64 = 30;
const SEEK_PERIOD: u64 = 10;
const SEEK_RADIUS: f32 = 12.0;
const SEEK_STEP: f32 = 0.5;
/// Health assumed for entities without a `health` key.
pub const DEFAULT_HEALTH: f64 = 20.0;

/// Chunk cells taken for a save, per chunk. Handed back if the save fails.
pub type PendingChanges = Vec<(ChunkPos, Vec<CellKey>)>;

/// Every live BigChunk of a world, for reads across borders.
pub type BigChunkDirectory = DashMap<BigChunkPos, Weak<BigChunk>>;

/// What every BigChunk of a world shares.
#[derive(Clone)]
pub struct BigChunkDeps {
    pub registry: Arc<BlockRegistry>,
    pub generator: Arc<dyn ChunkGenerator>,
    pub directory: Arc<BigChunkDirectory>,
    pub outbox: mpsc::Sender<WorldEvent>,
    pub metrics: Arc<Metrics>,
    pub tick_interval: Duration,
    pub queue_capacity: usize,
    pub seed: u64,
}

struct BigChunkState {
    chunks: HashMap<ChunkPos, Chunk>,
    entities: HashMap<EntityId, Entity>,
    /// Active cells whose block ticks every tick.
    tickables: BTreeSet<BlockPos>,
    /// Cells re-evaluated exactly once on the next tick.
    once_tickables: BTreeSet<BlockPos>,
    tick_count: u64,
    rng: SmallRng,
}

impl BigChunkState {
    /// The chunk at `pos`, generated on first touch. A generated chunk's
    /// tickable cells join the tick set.
    fn chunk_mut(&mut self, pos: ChunkPos, registry: &BlockRegistry, generator: &dyn ChunkGenerator) -> &mut Chunk {
        match self.chunks.entry(pos) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let chunk = generator.generate_chunk(pos, registry);
                self.tickables.extend(chunk.tickable_positions());
                entry.insert(chunk)
            }
        }
    }
}

/// The [`BlockApi`] a BigChunk hands to behaviors. Lives for one locked
/// operation and collects what that operation changed.
struct BlockCtx<'a> {
    owner: BigChunkPos,
    registry: &'a BlockRegistry,
    generator: &'a dyn ChunkGenerator,
    directory: &'a BigChunkDirectory,
    state: &'a mut BigChunkState,
    depth: u32,
    changes: Vec<BlockChange>,
    foreign: Vec<WorldEvent>,
    /// Last ID handed out for each cell outside this BigChunk. Writes to
    /// those cells are guarded by it.
    seen: HashMap<(BlockPos, BlockLayer), BlockId>,
}

impl<'a> BlockCtx<'a> {
    fn new(big_chunk: &'a BigChunk, state: &'a mut BigChunkState) -> Self {
        Self {
            owner: big_chunk.pos,
            registry: &big_chunk.registry,
            generator: big_chunk.generator.as_ref(),
            directory: &big_chunk.directory,
            state,
            depth: 0,
            changes: Vec::new(),
            foreign: Vec::new(),
            seen: HashMap::new(),
        }
    }

    /// Look into the chunk holding `pos` in another BigChunk. `None` if that
    /// BigChunk or chunk is not loaded, or its lock is busy.
    fn peek_foreign<R>(&self, pos: BlockPos, f: impl FnOnce(&Chunk) -> R) -> Option<R> {
        let neighbor = self
            .directory
            .get(&pos.big_chunk())
            .and_then(|entry| entry.value().upgrade())?;
        let state = neighbor.state.try_read()?;
        state.chunks.get(&pos.chunk()).map(f)
    }

    fn peek_foreign_id(&mut self, layer: BlockLayer, pos: BlockPos) -> Option<BlockId> {
        let id = self.peek_foreign(pos, |chunk| chunk.get_block_layer(layer, pos.local()));
        if let Some(id) = id {
            self.seen.insert((pos, layer), id);
        }
        id
    }

    /// Whether the cell still holds `expected`. `None` always holds.
    fn holds(&mut self, layer: BlockLayer, pos: BlockPos, expected: Option<BlockId>) -> bool {
        expected.is_none_or(|id| self.get_block_id_layer(layer, pos) == id)
    }

    /// The payload of a block write already forwarded to `pos` in this
    /// operation.
    fn pending_foreign_payload(&mut self, layer: BlockLayer, pos: BlockPos) -> Option<&mut Metadata> {
        self.foreign.iter_mut().rev().find_map(|event| match event {
            WorldEvent::ForeignBlock { change, .. } if change.pos == pos && change.layer == layer => {
                Some(&mut change.block.payload)
            }
            _ => None,
        })
    }

    fn chunk(&mut self, pos: BlockPos) -> &mut Chunk {
        self.state.chunk_mut(pos.chunk(), self.registry, self.generator)
    }

    fn record(&mut self, layer: BlockLayer, pos: BlockPos) {
        let block = self.chunk(pos).block_at(layer, pos.local());
        self.changes.push(BlockChange { pos, layer, block });
    }

    /// Install `id` at `pos`.
    ///
    /// On the Active layer a real replacement runs the old block's
    /// `on_break` first and the new block's `on_place` last. Whenever the ID
    /// changes the cell's metadata is reset to the new block's defaults;
    /// `payload` is merged on top either way.
    fn install(&mut self, layer: BlockLayer, pos: BlockPos, id: BlockId, payload: Option<&Metadata>) {
        if !self.owner.contains_block(pos) {
            let block = Block::with_payload(id, payload.cloned().unwrap_or_default());
            self.foreign.push(WorldEvent::ForeignBlock {
                origin: self.owner,
                change: BlockChange { pos, layer, block },
                expected: self.seen.get(&(pos, layer)).copied(),
            });
            return;
        }
        if self.depth >= MAX_CASCADE_DEPTH {
            tracing::warn!("BigChunk {:?}: cascade depth exceeded at {:?}, write skipped", self.owner, pos);
            return;
        }
        self.depth += 1;

        let registry = self.registry;
        let local = pos.local();
        let old = self.chunk(pos).get_block_layer(layer, local);
        let replaced = old != id;
        let lifecycle = replaced && layer == BlockLayer::Active;

        if lifecycle {
            if let Some(behavior) = registry.get(old) {
                behavior.on_break(self, pos);
            }
        }

        let chunk = self.state.chunk_mut(pos.chunk(), registry, self.generator);
        chunk.set_block_layer(layer, local, id, registry);
        if replaced {
            chunk.clear_metadata_layer(layer, local);
            if let Some(behavior) = registry.get(id) {
                let defaults = behavior.create_metadata();
                if !defaults.is_empty() {
                    chunk.set_block_metadata_layer(layer, local, &defaults);
                }
            }
        }
        if let Some(payload) = payload.filter(|p| !p.is_empty()) {
            chunk.set_block_metadata_layer(layer, local, payload);
        }
        if layer == BlockLayer::Active {
            let tickable = chunk.is_tickable(BlockLayer::Active, local);
            if tickable {
                self.state.tickables.insert(pos);
            } else {
                self.state.tickables.remove(&pos);
            }
        }
        self.record(layer, pos);

        if lifecycle {
            if let Some(behavior) = registry.get(id) {
                behavior.on_place(self, pos);
            }
        }
        self.depth -= 1;
    }

    fn replace_metadata(&mut self, layer: BlockLayer, pos: BlockPos, payload: &Metadata) {
        let local = pos.local();
        let chunk = self.chunk(pos);
        chunk.clear_metadata_layer(layer, local);
        if !payload.is_empty() {
            chunk.set_block_metadata_layer(layer, local, payload);
        }
        self.record(layer, pos);
    }

    fn interact(&mut self, pos: BlockPos, action: &str, action_payload: &Metadata) -> InteractionResult {
        if !self.owner.contains_block(pos) {
            return InteractionResult {
                success: false,
                effects: Vec::new(),
                message: Some(format!("{pos:?} is outside BigChunk {:?}", self.owner)),
            };
        }
        let current = self.chunk(pos).block_at(BlockLayer::Active, pos.local());
        let registry = self.registry;
        let Some(behavior) = registry.get(current.id) else {
            return InteractionResult::default();
        };

        let outcome = behavior.handle_interaction(action, &current.payload, action_payload);
        if outcome.block != current.id {
            self.install(BlockLayer::Active, pos, outcome.block, Some(&outcome.payload));
        } else if outcome.payload != current.payload {
            self.replace_metadata(BlockLayer::Active, pos, &outcome.payload);
        }
        outcome.result
    }

    fn player_interact(&mut self, pos: BlockPos, player: EntityId) -> bool {
        if !self.owner.contains_block(pos) {
            return false;
        }
        let id = self.get_block_id(pos);
        let registry = self.registry;
        if !registry.is_interactable(id) {
            return false;
        }
        registry
            .get(id)
            .is_some_and(|behavior| behavior.interact_with_player(self, pos, player))
    }

    /// Tick every tickable cell, dropping cells whose block stopped ticking.
    fn update_blocks(&mut self) -> u64 {
        let registry = self.registry;
        let positions: Vec<BlockPos> = self.state.tickables.iter().copied().collect();
        let mut ran = 0;
        for pos in positions {
            let id = self.get_block_id(pos);
            match registry.get(id) {
                Some(behavior) if registry.needs_tick(id) => {
                    behavior.tick_update(self, pos);
                    ran += 1;
                }
                _ => {
                    self.state.tickables.remove(&pos);
                }
            }
        }
        ran
    }

    /// Drain the once-set. Cells scheduled while draining wait for the next
    /// tick.
    fn update_once_blocks(&mut self) -> u64 {
        let registry = self.registry;
        let once = std::mem::take(&mut self.state.once_tickables);
        let mut ran = 0;
        for pos in once {
            let id = self.get_block_id(pos);
            if let Some(behavior) = registry.get(id) {
                behavior.tick_update(self, pos);
                ran += 1;
            }
        }
        ran
    }

    /// Changes (last write per cell, in first-write order of that last
    /// write) and events for other BigChunks.
    fn finish(self) -> (Vec<BlockChange>, Vec<WorldEvent>) {
        let mut seen = HashSet::new();
        let mut changes: Vec<BlockChange> = self
            .changes
            .into_iter()
            .rev()
            .filter(|c| seen.insert((c.pos, c.layer)))
            .collect();
        changes.reverse();
        (changes, self.foreign)
    }
}

impl BlockApi for BlockCtx<'_> {
    fn get_block_id_layer(&mut self, layer: BlockLayer, pos: BlockPos) -> BlockId {
        if !self.owner.contains_block(pos) {
            let id = self.peek_foreign_id(layer, pos).unwrap_or(BlockId::AIR);
            self.seen.insert((pos, layer), id);
            return id;
        }
        self.chunk(pos).get_block_layer(layer, pos.local())
    }

    fn peek_block_id_layer(&mut self, layer: BlockLayer, pos: BlockPos) -> Option<BlockId> {
        if !self.owner.contains_block(pos) {
            return self.peek_foreign_id(layer, pos);
        }
        Some(self.chunk(pos).get_block_layer(layer, pos.local()))
    }

    fn set_block_layer(&mut self, layer: BlockLayer, pos: BlockPos, id: BlockId) {
        self.install(layer, pos, id, None);
    }

    fn get_block_metadata_layer(&mut self, layer: BlockLayer, pos: BlockPos, key: &str) -> Option<MetaValue> {
        if !self.owner.contains_block(pos) {
            return self
                .peek_foreign(pos, |chunk| chunk.metadata_value(layer, pos.local(), key).cloned())
                .flatten();
        }
        self.chunk(pos).metadata_value(layer, pos.local(), key).cloned()
    }

    fn set_block_metadata_layer(&mut self, layer: BlockLayer, pos: BlockPos, key: &str, value: MetaValue) {
        if !self.owner.contains_block(pos) {
            // Rides along with a block write to the same cell, so both are
            // guarded together.
            if let Some(payload) = self.pending_foreign_payload(layer, pos) {
                payload.set(key, value);
                return;
            }
            self.foreign.push(WorldEvent::ForeignMetadata {
                origin: self.owner,
                pos,
                layer,
                key: key.to_string(),
                value,
                expected: self.seen.get(&(pos, layer)).copied(),
            });
            return;
        }
        self.chunk(pos).set_metadata_value(layer, pos.local(), key, value);
        self.record(layer, pos);
    }

    fn schedule_update_once(&mut self, pos: BlockPos) {
        if self.owner.contains_block(pos) {
            self.state.once_tickables.insert(pos);
        } else {
            self.foreign.push(WorldEvent::ForeignSchedule { origin: self.owner, pos });
        }
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.state.rng
    }
}

pub struct BigChunk {
    pos: BigChunkPos,
    registry: Arc<BlockRegistry>,
    generator: Arc<dyn ChunkGenerator>,
    directory: Arc<BigChunkDirectory>,
    state: RwLock<BigChunkState>,
    inbox: mpsc::Sender<BigChunkEvent>,
    outbox: mpsc::Sender<WorldEvent>,
    metrics: Arc<Metrics>,
    tick_interval: Duration,
}

impl BigChunk {
    /// Create an empty BigChunk and list it in the shared directory. The
    /// caller either spawns [`BigChunk::run`] with the returned receiver or
    /// pumps it by hand with [`BigChunk::drain`].
    pub fn new(pos: BigChunkPos, deps: &BigChunkDeps) -> (Arc<Self>, mpsc::Receiver<BigChunkEvent>) {
        let (inbox, rx) = mpsc::channel(deps.queue_capacity.max(1));
        let salt = ((pos.x as u32 as u64) << 32) | pos.y as u32 as u64;
        let big_chunk = Arc::new(Self {
            pos,
            registry: Arc::clone(&deps.registry),
            generator: Arc::clone(&deps.generator),
            directory: Arc::clone(&deps.directory),
            state: RwLock::new(BigChunkState {
                chunks: HashMap::new(),
                entities: HashMap::new(),
                tickables: BTreeSet::new(),
                once_tickables: BTreeSet::new(),
                tick_count: 0,
                rng: SmallRng::seed_from_u64(deps.seed ^ salt),
            }),
            inbox,
            outbox: deps.outbox.clone(),
            metrics: Arc::clone(&deps.metrics),
            tick_interval: deps.tick_interval,
        });
        deps.directory.insert(pos, Arc::downgrade(&big_chunk));
        (big_chunk, rx)
    }

    pub fn pos(&self) -> BigChunkPos {
        self.pos
    }

    /// Non-blocking send to this BigChunk's queue.
    pub fn enqueue(&self, event: BigChunkEvent) -> Enqueue {
        try_enqueue(&self.inbox, event, QueueKind::BigChunkInbox, &self.metrics)
    }

    fn send(&self, event: WorldEvent) -> Enqueue {
        try_enqueue(&self.outbox, event, QueueKind::WorldOutbox, &self.metrics)
    }

    fn forward(&self, foreign: Vec<WorldEvent>) {
        for event in foreign {
            self.send(event);
        }
    }

    fn report(&self, source: ChangeSource, changes: Vec<BlockChange>) {
        if !changes.is_empty() {
            self.send(WorldEvent::BlocksChanged {
                origin: self.pos,
                source,
                changes,
            });
        }
    }

    /// Run `f` against a block API over the locked state. Writes aimed at
    /// other BigChunks are forwarded once the lock is released; local
    /// changes are returned.
    fn with_ctx<R>(&self, f: impl FnOnce(&mut BlockCtx<'_>) -> R) -> (R, Vec<BlockChange>) {
        let (out, changes, foreign) = {
            let mut state = self.state.write();
            let mut ctx = BlockCtx::new(self, &mut state);
            let out = f(&mut ctx);
            let (changes, foreign) = ctx.finish();
            (out, changes, foreign)
        };
        self.forward(foreign);
        (out, changes)
    }

    /// Block API access for callers outside a tick (tools, tests).
    pub fn with_block_api<R>(&self, f: impl FnOnce(&mut dyn BlockApi) -> R) -> (R, Vec<BlockChange>) {
        self.with_ctx(|ctx| f(ctx))
    }

    // ── Synchronous block access ─────────────────────────────────────────

    /// Positions outside this BigChunk read as Air.
    pub fn get_block_layer(&self, layer: BlockLayer, pos: BlockPos) -> Block {
        if !self.pos.contains_block(pos) {
            return Block::air();
        }
        {
            let state = self.state.read();
            if let Some(chunk) = state.chunks.get(&pos.chunk()) {
                return chunk.block_at(layer, pos.local());
            }
        }
        let mut state = self.state.write();
        state
            .chunk_mut(pos.chunk(), &self.registry, self.generator.as_ref())
            .block_at(layer, pos.local())
    }

    pub fn set_block_layer(&self, layer: BlockLayer, pos: BlockPos, block: Block) -> Vec<BlockChange> {
        self.with_ctx(|ctx| ctx.install(layer, pos, block.id, Some(&block.payload)))
            .1
    }

    pub fn interact_block(&self, pos: BlockPos, action: &str, payload: &Metadata) -> (InteractionResult, Vec<BlockChange>) {
        self.with_ctx(|ctx| ctx.interact(pos, action, payload))
    }

    pub fn interact_player(&self, pos: BlockPos, player: EntityId) -> (bool, Vec<BlockChange>) {
        self.with_ctx(|ctx| ctx.player_interact(pos, player))
    }

    /// Load (generate) a chunk. Returns whether it was newly created.
    pub fn ensure_chunk(&self, pos: ChunkPos) -> bool {
        if !self.pos.contains_chunk(pos) {
            return false;
        }
        let mut state = self.state.write();
        if state.chunks.contains_key(&pos) {
            return false;
        }
        state.chunk_mut(pos, &self.registry, self.generator.as_ref());
        true
    }

    pub fn loaded_chunks(&self) -> usize {
        self.state.read().chunks.len()
    }

    pub fn tick_count(&self) -> u64 {
        self.state.read().tick_count
    }

    pub fn tickable_positions(&self) -> Vec<BlockPos> {
        self.state.read().tickables.iter().copied().collect()
    }

    /// Cells waiting for their one-shot re-check.
    pub fn scheduled_once(&self) -> Vec<BlockPos> {
        self.state.read().once_tickables.iter().copied().collect()
    }

    // ── Entities ─────────────────────────────────────────────────────────

    /// Rejects entities positioned elsewhere and duplicate IDs, handing the
    /// entity back.
    pub fn insert_entity(&self, entity: Entity) -> Result<(), Entity> {
        if !self.pos.contains_block(entity.position.tile()) {
            return Err(entity);
        }
        let mut state = self.state.write();
        if state.entities.contains_key(&entity.id) {
            return Err(entity);
        }
        state.entities.insert(entity.id, entity);
        Ok(())
    }

    pub fn remove_entity(&self, id: EntityId) -> Option<Entity> {
        self.state.write().entities.remove(&id)
    }

    /// Move an entity within this BigChunk. No collision check.
    pub fn set_entity_position(&self, id: EntityId, position: Vec2) -> bool {
        if !self.pos.contains_block(position.tile()) {
            return false;
        }
        match self.state.write().entities.get_mut(&id) {
            Some(entity) => {
                entity.position = position;
                true
            }
            None => false,
        }
    }

    pub fn modify_entity<R>(&self, id: EntityId, f: impl FnOnce(&mut Entity) -> R) -> Option<R> {
        self.state.write().entities.get_mut(&id).map(f)
    }

    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.state.read().entities.get(&id).cloned()
    }

    /// Copy of every entity, ordered by ID.
    pub fn entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.state.read().entities.values().cloned().collect();
        entities.sort_unstable_by_key(|e| e.id);
        entities
    }

    pub fn entity_count(&self) -> usize {
        self.state.read().entities.len()
    }

    pub fn with_entities_mut<R>(&self, f: impl FnOnce(&mut HashMap<EntityId, Entity>) -> R) -> R {
        f(&mut self.state.write().entities)
    }

    /// Would the entity fit at `target`? Every covered tile must be inside
    /// this BigChunk and passable, and the box must not overlap another
    /// active entity.
    pub fn can_entity_move_to(&self, id: EntityId, target: Vec2) -> bool {
        let mut state = self.state.write();
        self.can_move(&mut state, id, target)
    }

    fn can_move(&self, state: &mut BigChunkState, id: EntityId, target: Vec2) -> bool {
        let Some(entity) = state.entities.get(&id) else {
            return false;
        };
        let bounds = entity.bounds_at(target);
        for tile in bounds.tiles() {
            if !self.pos.contains_block(tile) {
                return false;
            }
            let block = state
                .chunk_mut(tile.chunk(), &self.registry, self.generator.as_ref())
                .get_block(tile.local());
            if !self.registry.is_passable(block) {
                return false;
            }
        }
        !state
            .entities
            .values()
            .any(|other| other.id != id && other.active && bounds.overlaps(&other.bounds()))
    }

    fn update_entities(&self, state: &mut BigChunkState) -> Vec<(EntityId, Vec2, Vec2)> {
        let tick = state.tick_count;
        let mut ids: Vec<EntityId> = state.entities.keys().copied().collect();
        ids.sort_unstable();

        let mut moved = Vec::new();
        for id in ids {
            let Some(entity) = state.entities.get(&id) else {
                continue;
            };
            if !entity.active {
                continue;
            }
            let (kind, position) = (entity.kind, entity.position);
            let phase = tick.wrapping_add(id.0);

            // Players move from network input only.
            let target = match kind {
                EntityKind::Npc if phase % WANDER_PERIOD == 0 => Some(wander(&mut state.rng, position)),
                EntityKind::Monster => match nearest_player(&state.entities, position) {
                    Some(player) if phase % SEEK_PERIOD == 0 => step_toward(position, player),
                    Some(_) => None,
                    None if phase % WANDER_PERIOD == 0 => Some(wander(&mut state.rng, position)),
                    None => None,
                },
                _ => None,
            };

            let Some(target) = target else {
                continue;
            };
            if self.can_move(state, id, target) {
                if let Some(entity) = state.entities.get_mut(&id) {
                    entity.position = target;
                    moved.push((id, position, target));
                }
            }
        }
        moved
    }

    fn interact_entity(&self, id: EntityId, action: &str, amount: f64) {
        let removed = {
            let mut state = self.state.write();
            let Some(entity) = state.entities.get_mut(&id) else {
                return;
            };
            let health = entity.health().unwrap_or(DEFAULT_HEALTH);
            let next = match action {
                "damage" => health - amount,
                "heal" => {
                    let healed = health + amount;
                    entity.metadata.get_float("max_health").map_or(healed, |max| healed.min(max))
                }
                other => {
                    tracing::debug!("Entity {:?}: unknown interaction '{}'", id, other);
                    return;
                }
            };
            entity.metadata.set("health", next.max(0.0));
            if next <= 0.0 { state.entities.remove(&id) } else { None }
        };

        if let Some(entity) = removed {
            self.send(WorldEvent::EntityRemoved {
                origin: self.pos,
                id,
                position: entity.position,
            });
        }
    }

    // ── Events and ticks ─────────────────────────────────────────────────

    pub fn handle_event(&self, event: BigChunkEvent) {
        match event {
            BigChunkEvent::Block(event) => self.handle_block_event(event),
            BigChunkEvent::Entity(event) => self.handle_entity_event(event),
            BigChunkEvent::Save { chunks } => {
                self.save_state(chunks);
            }
            BigChunkEvent::Tick => self.process_tick(),
        }
    }

    fn handle_block_event(&self, event: BlockEvent) {
        let (_, changes) = self.with_ctx(|ctx| match event {
            BlockEvent::Change {
                pos,
                layer,
                block,
                expected,
            } => {
                if ctx.holds(layer, pos, expected) {
                    ctx.install(layer, pos, block.id, Some(&block.payload));
                } else {
                    tracing::debug!("BigChunk {:?}: guarded write at {:?} skipped, cell changed", ctx.owner, pos);
                }
            }
            BlockEvent::Interact { pos, action, payload } => {
                let result = ctx.interact(pos, &action, &payload);
                tracing::debug!("Interaction '{}' at {:?}: {:?}", action, pos, result);
            }
            BlockEvent::PlayerInteract { pos, player } => {
                ctx.player_interact(pos, player);
            }
            BlockEvent::ScheduleOnce { pos } => ctx.schedule_update_once(pos),
            BlockEvent::Metadata {
                pos,
                layer,
                key,
                value,
                expected,
            } => {
                if ctx.holds(layer, pos, expected) {
                    ctx.set_block_metadata_layer(layer, pos, &key, value);
                }
            }
        });
        self.report(ChangeSource::Routed(self.pos), changes);
    }

    fn handle_entity_event(&self, event: EntityEvent) {
        match event {
            EntityEvent::Spawn(entity) => match self.insert_entity(entity.clone()) {
                Ok(()) => {
                    self.send(WorldEvent::EntitySpawned { origin: self.pos, entity });
                }
                Err(entity) => {
                    tracing::warn!("BigChunk {:?}: spawn of {:?} rejected", self.pos, entity.id);
                }
            },
            EntityEvent::Despawn { id } => {
                if let Some(entity) = self.remove_entity(id) {
                    self.send(WorldEvent::EntityRemoved {
                        origin: self.pos,
                        id,
                        position: entity.position,
                    });
                }
            }
            EntityEvent::Move { id, position } => {
                let Some(from) = self.entity(id).map(|e| e.position) else {
                    return;
                };
                // Destinations in another BigChunk are relocated by the world
                // manager when it sees the move.
                self.set_entity_position(id, position);
                self.send(WorldEvent::EntityMoved {
                    origin: self.pos,
                    id,
                    from,
                    to: position,
                });
            }
            EntityEvent::Interact { id, action, amount } => self.interact_entity(id, &action, amount),
        }
    }

    /// One tick: tickable blocks, one-shot re-checks, then entity AI.
    pub fn process_tick(&self) {
        let (updates, changes, foreign, moved) = {
            let mut state = self.state.write();
            state.tick_count += 1;
            let mut ctx = BlockCtx::new(self, &mut state);
            let updates = ctx.update_blocks() + ctx.update_once_blocks();
            let (changes, foreign) = ctx.finish();
            let moved = self.update_entities(&mut state);
            (updates, changes, foreign, moved)
        };

        self.metrics.record_tick(updates);
        self.forward(foreign);
        self.report(ChangeSource::Tick(self.pos), changes);
        for (id, from, to) in moved {
            self.send(WorldEvent::EntityMoved {
                origin: self.pos,
                id,
                from,
                to,
            });
        }
    }

    /// Handle queued events without waiting, up to a fixed budget.
    pub fn drain(&self, inbox: &mut mpsc::Receiver<BigChunkEvent>) -> usize {
        let mut handled = 0;
        while handled < MAX_DRAIN {
            match inbox.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Take every dirty chunk's change set and return copies of those chunks.
    pub fn take_dirty_chunks(&self) -> (Vec<Chunk>, PendingChanges) {
        let mut state = self.state.write();
        let mut chunks = Vec::new();
        let mut pending = Vec::new();
        for (pos, chunk) in state.chunks.iter_mut() {
            if chunk.is_dirty() {
                let cells = chunk.take_changes();
                chunks.push(chunk.clone());
                pending.push((*pos, cells));
            }
        }
        (chunks, pending)
    }

    /// Mark cells dirty again after a failed save.
    pub fn restore_changes(&self, pending: PendingChanges) {
        let mut state = self.state.write();
        for (pos, cells) in pending {
            if let Some(chunk) = state.chunks.get_mut(&pos) {
                chunk.restore_changes(cells);
            }
        }
    }

    /// Snapshot all entities, and dirty chunks if `with_chunks`, to the
    /// world manager as two events. Chunks stay dirty if their event could
    /// not be queued.
    pub fn save_state(&self, with_chunks: bool) -> Enqueue {
        let (chunks, pending) = if with_chunks {
            self.take_dirty_chunks()
        } else {
            (Vec::new(), Vec::new())
        };
        let entities = self.entities();
        self.metrics.save_issued();
        tracing::debug!(
            "BigChunk {:?}: saving {} chunks, {} entities",
            self.pos,
            chunks.len(),
            entities.len()
        );

        let chunks_sent = if chunks.is_empty() {
            Enqueue::Enqueued
        } else {
            self.send(WorldEvent::ChunksSaved { origin: self.pos, chunks })
        };
        if !chunks_sent.is_enqueued() {
            self.restore_changes(pending);
            return chunks_sent;
        }
        self.send(WorldEvent::EntitiesSaved {
            origin: self.pos,
            entities,
        })
    }

    /// The actor loop. Exits when `cancel` fires.
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<BigChunkEvent>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it.
        ticker.tick().await;
        tracing::debug!("BigChunk {:?} running", self.pos);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = inbox.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.process_tick();
                    self.drain(&mut inbox);
                }
            }
        }
        tracing::debug!("BigChunk {:?} stopped", self.pos);
    }
}

fn wander(rng: &mut SmallRng, from: Vec2) -> Vec2 {
    const STEPS: [(f32, f32); 4] = [(1.0, 0.0), (-1.0, 0.0), (0.0, 1.0), (0.0, -1.0)];
    let (dx, dy) = STEPS[rng.gen_range(0..STEPS.len())];
    Vec2::new(from.x + dx, from.y + dy)
}

fn nearest_player(entities: &HashMap<EntityId, Entity>, from: Vec2) -> Option<Vec2> {
    entities
        .values()
        .filter(|e| e.kind == EntityKind::Player && e.active)
        .map(|e| (e.position.distance_squared(from), e.position))
        .filter(|(d, _)| *d <= SEEK_RADIUS * SEEK_RADIUS)
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, p)| p)
}

/// Half a tile toward `to`, or `None` once adjacent.
fn step_toward(from: Vec2, to: Vec2) -> Option<Vec2> {
    let distance = from.distance_squared(to).sqrt();
    if distance <= 1.0 {
        return None;
    }
    let scale = SEEK_STEP / distance;
    Some(Vec2::new(from.x + (to.x - from.x) * scale, from.y + (to.y - from.y) * scale))
}
