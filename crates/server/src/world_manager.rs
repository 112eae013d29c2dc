//! The world manager: which BigChunk owns a position, lazy BigChunk
//! creation, entity relocation, saves, and the world loop.
//!
//! Block get/set and entity spawn/despawn/move are synchronous and take the
//! owning BigChunk's lock. The event queues carry routed block events,
//! persistence snapshots, writes behaviors make outside their own BigChunk,
//! and change fan-out back to this manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tilerealm_engine::behavior::InteractionResult;
use tilerealm_engine::behavior::registry::BlockRegistry;
use tilerealm_engine::entity::{Entity, EntityId, EntityKind};
use tilerealm_engine::spatial::{RegionManager, RegionUpdate};
use tilerealm_engine::world::ChunkGenerator;
use tilerealm_engine::world::block::{Block, BlockLayer};
use tilerealm_engine::world::meta::Metadata;
use tilerealm_engine::world::position::{BigChunkPos, BlockPos, Vec2};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::big_chunk::{BigChunk, BigChunkDeps, BigChunkDirectory};
use crate::collab::{EntityStorage, NetworkManager};
use crate::config::WorldConfig;
use crate::event_bus::{self, BUS_CAPACITY, ChangeSource, WorldChange, WorldChangeBatch};
use crate::events::{BigChunkEvent, BlockChange, BlockEvent, Enqueue, EntityEvent, WorldEvent};
use crate::metrics::{Metrics, MetricsSnapshot};

/// First ID handed out by [`WorldManager::spawn_entity`].
pub const FIRST_ENTITY_ID: u64 = 1000;
/// Upper bound on drain rounds in one [`WorldManager::pump`].
const MAX_PUMP_ROUNDS: usize = 64;
/// Outbound events handled per pump round.
const OUTBOX_BATCH: usize = 1024;

/// Outcome of [`WorldManager::process_entity_movement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    /// Moved from one BigChunk into another.
    Relocated { from: BigChunkPos, to: BigChunkPos },
    /// Moved inside one BigChunk, or a concurrent call already relocated it.
    Moved,
    NotFound,
    /// The destination refused the entity; it stays where it was.
    Rejected,
}

/// A BigChunk with no actor task; its queue is drained by [`WorldManager::pump`].
struct Parked {
    big_chunk: Arc<BigChunk>,
    inbox: mpsc::Receiver<BigChunkEvent>,
}

pub struct WorldManager {
    config: WorldConfig,
    deps: BigChunkDeps,
    big_chunks: DashMap<BigChunkPos, Arc<BigChunk>>,
    parked: Mutex<HashMap<BigChunkPos, Parked>>,
    outbox: Mutex<Option<mpsc::Receiver<WorldEvent>>>,
    runtime: Option<Handle>,
    task: Mutex<Option<JoinHandle<()>>>,
    network: RwLock<Option<Arc<dyn NetworkManager>>>,
    storage: RwLock<Option<Arc<dyn EntityStorage>>>,
    bus: broadcast::Sender<WorldChangeBatch>,
    regions: RegionManager,
    /// Serializes changes to which BigChunk holds an entity ID.
    membership: Mutex<()>,
    next_entity_id: AtomicU64,
    last_save: Mutex<Option<Instant>>,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
}

impl WorldManager {
    /// Create a world. Inside a tokio runtime every BigChunk gets its own
    /// actor task; outside one the world behaves like
    /// [`WorldManager::new_detached`].
    pub fn new(config: WorldConfig, registry: Arc<BlockRegistry>, generator: Arc<dyn ChunkGenerator>) -> Result<Arc<Self>> {
        Self::build(config, registry, generator, Handle::try_current().ok())
    }

    /// Create a world whose BigChunks never run on their own. Queued events
    /// apply on [`WorldManager::pump`], ticks on [`WorldManager::tick_all`].
    pub fn new_detached(
        config: WorldConfig,
        registry: Arc<BlockRegistry>,
        generator: Arc<dyn ChunkGenerator>,
    ) -> Result<Arc<Self>> {
        Self::build(config, registry, generator, None)
    }

    fn build(
        config: WorldConfig,
        registry: Arc<BlockRegistry>,
        generator: Arc<dyn ChunkGenerator>,
        runtime: Option<Handle>,
    ) -> Result<Arc<Self>> {
        let regions = RegionManager::new(config.region_config()).context("building region worker pool")?;
        let (outbox_tx, outbox_rx) = mpsc::channel(config.world_queue.max(1));
        let metrics = Arc::new(Metrics::new());
        let (bus, _) = broadcast::channel(BUS_CAPACITY);

        let deps = BigChunkDeps {
            registry,
            generator,
            directory: Arc::new(BigChunkDirectory::new()),
            outbox: outbox_tx,
            metrics: Arc::clone(&metrics),
            tick_interval: config.tick_interval(),
            queue_capacity: config.big_chunk_queue,
            seed: config.seed,
        };

        tracing::info!(
            "World manager ready (seed {}, {} Hz ticks, {})",
            config.seed,
            config.tick_hz,
            if runtime.is_some() { "actors" } else { "detached" }
        );

        Ok(Arc::new(Self {
            config,
            deps,
            big_chunks: DashMap::new(),
            parked: Mutex::new(HashMap::new()),
            outbox: Mutex::new(Some(outbox_rx)),
            runtime,
            task: Mutex::new(None),
            network: RwLock::new(None),
            storage: RwLock::new(None),
            bus,
            regions,
            membership: Mutex::new(()),
            next_entity_id: AtomicU64::new(FIRST_ENTITY_ID),
            last_save: Mutex::new(None),
            cancel: CancellationToken::new(),
            metrics,
        }))
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.deps.registry
    }

    pub fn set_network_manager(&self, network: Arc<dyn NetworkManager>) {
        *self.network.write() = Some(network);
    }

    /// Storage is consulted when a BigChunk is created and on every save.
    pub fn set_storage(&self, storage: Arc<dyn EntityStorage>) {
        *self.storage.write() = Some(storage);
    }

    fn network(&self) -> Option<Arc<dyn NetworkManager>> {
        self.network.read().clone()
    }

    fn storage(&self) -> Option<Arc<dyn EntityStorage>> {
        self.storage.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorldChangeBatch> {
        self.bus.subscribe()
    }

    // ── BigChunk ownership ───────────────────────────────────────────────

    /// The BigChunk at `pos`, created on first use. Concurrent callers always
    /// get the same instance.
    pub fn big_chunk(&self, pos: BigChunkPos) -> Arc<BigChunk> {
        if let Some(existing) = self.big_chunks.get(&pos) {
            return Arc::clone(existing.value());
        }

        // Storage is read before the map shard is locked. A racing creator
        // may win the entry, in which case this read is discarded.
        let loaded = self.load_entities(pos);
        let mut created = None;
        let big_chunk = {
            let entry = self.big_chunks.entry(pos).or_insert_with(|| {
                let (big_chunk, inbox) = BigChunk::new(pos, &self.deps);
                if let Some((storage, entities)) = loaded {
                    big_chunk.with_entities_mut(|table| storage.apply_entities(table, entities));
                }
                created = Some(inbox);
                big_chunk
            });
            Arc::clone(entry.value())
        };

        if let Some(inbox) = created {
            for entity in big_chunk.entities() {
                self.reserve_entity_id(entity.id);
                self.regions.add_entity(entity);
            }
            self.activate(&big_chunk, inbox);
            tracing::debug!("BigChunk {:?} created", pos);
        }
        big_chunk
    }

    /// The BigChunk at `pos` if it is loaded.
    pub fn loaded_big_chunk(&self, pos: BigChunkPos) -> Option<Arc<BigChunk>> {
        self.big_chunks.get(&pos).map(|entry| Arc::clone(entry.value()))
    }

    pub fn big_chunk_count(&self) -> usize {
        self.big_chunks.len()
    }

    fn loaded(&self) -> Vec<Arc<BigChunk>> {
        self.big_chunks.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    fn load_entities(&self, pos: BigChunkPos) -> Option<(Arc<dyn EntityStorage>, Vec<Entity>)> {
        let storage = self.storage()?;
        match storage.load_entities(pos) {
            Ok(Some(loaded)) => {
                tracing::debug!("BigChunk {:?}: loaded {} entities", pos, loaded.len());
                Some((storage, loaded))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("BigChunk {:?}: entity load failed: {:#}", pos, e);
                None
            }
        }
    }

    fn activate(&self, big_chunk: &Arc<BigChunk>, inbox: mpsc::Receiver<BigChunkEvent>) {
        match &self.runtime {
            Some(runtime) => {
                runtime.spawn(Arc::clone(big_chunk).run(inbox, self.cancel.clone()));
            }
            None => {
                self.parked.lock().insert(
                    big_chunk.pos(),
                    Parked {
                        big_chunk: Arc::clone(big_chunk),
                        inbox,
                    },
                );
            }
        }
    }

    // ── Blocks ───────────────────────────────────────────────────────────

    pub fn get_block(&self, pos: BlockPos) -> Block {
        self.get_block_layer(BlockLayer::Active, pos)
    }

    pub fn get_block_layer(&self, layer: BlockLayer, pos: BlockPos) -> Block {
        self.big_chunk(pos.big_chunk()).get_block_layer(layer, pos)
    }

    pub fn set_block(&self, pos: BlockPos, block: Block) -> Vec<BlockChange> {
        self.set_block_layer(BlockLayer::Active, pos, block)
    }

    /// Synchronous write through the full place/break lifecycle. Returns
    /// every cell the write changed inside the owning BigChunk; cascades
    /// into neighbors are routed.
    pub fn set_block_layer(&self, layer: BlockLayer, pos: BlockPos, block: Block) -> Vec<BlockChange> {
        let changes = self.big_chunk(pos.big_chunk()).set_block_layer(layer, pos, block);
        self.commit(ChangeSource::Api, &changes);
        changes
    }

    /// Apply a tool/player action to the Active block at `pos`.
    pub fn interact_block(&self, pos: BlockPos, action: &str, payload: &Metadata) -> InteractionResult {
        let (result, changes) = self.big_chunk(pos.big_chunk()).interact_block(pos, action, payload);
        self.commit(ChangeSource::Api, &changes);
        result
    }

    /// Direct use of an interactable block by a player.
    pub fn interact_player(&self, pos: BlockPos, player: EntityId) -> bool {
        let (handled, changes) = self.big_chunk(pos.big_chunk()).interact_player(pos, player);
        self.commit(ChangeSource::Api, &changes);
        handled
    }

    /// Fan committed changes out to the network and the bus.
    fn commit(&self, source: ChangeSource, changes: &[BlockChange]) {
        if changes.is_empty() {
            return;
        }
        if let Some(network) = self.network() {
            for change in changes {
                network.send_block_update(change.pos, change.layer, &change.block);
            }
        }
        event_bus::publish(
            &self.bus,
            source,
            changes.iter().cloned().map(WorldChange::Block).collect(),
        );
    }

    // ── Routed events ────────────────────────────────────────────────────

    /// Queue a block event on the owning BigChunk. An unguarded `Change` is
    /// also sent to the network right away; a guarded one only once it
    /// applies.
    pub fn route_block_event(&self, event: BlockEvent) -> Enqueue {
        if let BlockEvent::Change {
            pos,
            layer,
            block,
            expected: None,
        } = &event
        {
            if let Some(network) = self.network() {
                network.send_block_update(*pos, *layer, block);
            }
        }
        let owner = event.pos().big_chunk();
        self.big_chunk(owner).enqueue(BigChunkEvent::Block(event))
    }

    /// Queue an entity event on the owning BigChunk. `None` if the entity is
    /// not known anywhere, or for a spawn whose ID is already live.
    ///
    /// A spawn joins the region simulation only once its BigChunk accepts
    /// it.
    pub fn route_entity_event(&self, event: EntityEvent) -> Option<Enqueue> {
        let owner = match &event {
            EntityEvent::Spawn(entity) => {
                if self.locate(entity.id).is_some() {
                    tracing::warn!("Spawn of {:?} not routed: the ID is live", entity.id);
                    return None;
                }
                entity.position.tile().big_chunk()
            }
            EntityEvent::Despawn { id } | EntityEvent::Move { id, .. } | EntityEvent::Interact { id, .. } => {
                self.locate(*id)?.pos()
            }
        };
        Some(self.big_chunk(owner).enqueue(BigChunkEvent::Entity(event)))
    }

    /// Queue a forced tick on the BigChunk at `pos`.
    pub fn request_tick(&self, pos: BigChunkPos) -> Enqueue {
        self.big_chunk(pos).enqueue(BigChunkEvent::Tick)
    }

    // ── Entities ─────────────────────────────────────────────────────────

    /// The BigChunk currently holding `id`.
    fn locate(&self, id: EntityId) -> Option<Arc<BigChunk>> {
        if let Some(entity) = self.regions.get_entity(id) {
            let hinted = self.big_chunk(entity.position.tile().big_chunk());
            if hinted.entity(id).is_some() {
                return Some(hinted);
            }
        }
        self.loaded().into_iter().find(|big_chunk| big_chunk.entity(id).is_some())
    }

    pub fn next_entity_id(&self) -> EntityId {
        EntityId(self.next_entity_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Keep fresh IDs above one that came from elsewhere.
    fn reserve_entity_id(&self, id: EntityId) {
        self.next_entity_id.fetch_max(id.0.saturating_add(1), Ordering::Relaxed);
    }

    /// Create an entity with a fresh ID.
    pub fn spawn_entity(&self, kind: EntityKind, position: Vec2, metadata: Metadata) -> Option<EntityId> {
        let entity = Entity::new(self.next_entity_id(), kind, position).with_metadata(metadata);
        let id = entity.id;
        self.add_entity(entity).then_some(id)
    }

    /// Insert a fully built entity. Fails if its ID is live in any
    /// BigChunk.
    pub fn add_entity(&self, entity: Entity) -> bool {
        let owner = entity.position.tile().big_chunk();
        let (id, position) = (entity.id, entity.position);
        {
            let _membership = self.membership.lock();
            if let Some(holder) = self.locate(id) {
                tracing::warn!("Entity {:?} already exists in BigChunk {:?}", id, holder.pos());
                return false;
            }
            if self.big_chunk(owner).insert_entity(entity.clone()).is_err() {
                tracing::warn!("Entity {:?} refused by BigChunk {:?}", id, owner);
                return false;
            }
        }
        self.reserve_entity_id(id);
        self.regions.add_entity(entity);
        event_bus::publish(
            &self.bus,
            ChangeSource::Api,
            vec![WorldChange::EntitySpawned {
                id,
                big_chunk: owner,
                position,
            }],
        );
        true
    }

    pub fn despawn_entity(&self, id: EntityId) -> Option<Entity> {
        let big_chunk = self.locate(id)?;
        let entity = big_chunk.remove_entity(id)?;
        self.regions.remove_entity(id);
        event_bus::publish(
            &self.bus,
            ChangeSource::Api,
            vec![WorldChange::EntityDespawned {
                id,
                big_chunk: big_chunk.pos(),
                position: entity.position,
            }],
        );
        Some(entity)
    }

    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.locate(id)?.entity(id)
    }

    pub fn entity_count(&self) -> usize {
        self.regions.entity_count()
    }

    /// Give an entity a velocity for the region simulation to integrate.
    pub fn set_entity_velocity(&self, id: EntityId, velocity: Vec2) -> bool {
        if let Some(big_chunk) = self.locate(id) {
            big_chunk.modify_entity(id, |e| e.velocity = velocity);
        }
        self.regions.set_velocity(id, velocity)
    }

    /// Move an entity from `old` to `new`.
    ///
    /// Inside one BigChunk this is a plain position update. Across a
    /// boundary the entity is taken out of the source (only one concurrent
    /// caller can win that) and put into the destination, or back into the
    /// source if the destination refuses it. A relocation publishes exactly
    /// one despawn and one spawn.
    pub fn process_entity_movement(&self, id: EntityId, old: Vec2, new: Vec2) -> Relocation {
        self.move_entity(id, old, new, ChangeSource::Api)
    }

    fn move_entity(&self, id: EntityId, old: Vec2, new: Vec2, source: ChangeSource) -> Relocation {
        let from = old.tile().big_chunk();
        let to = new.tile().big_chunk();

        if from == to {
            if !self.big_chunk(from).set_entity_position(id, new) {
                return Relocation::NotFound;
            }
            self.regions.move_entity(id, new);
            event_bus::publish(&self.bus, source, vec![WorldChange::EntityMoved { id, from: old, to: new }]);
            return Relocation::Moved;
        }

        let origin = self.big_chunk(from);
        let destination = self.big_chunk(to);
        // The entity is in neither BigChunk for a moment; keep spawns of the
        // same ID out of that window.
        let membership = self.membership.lock();
        let Some(mut entity) = origin.remove_entity(id) else {
            return if destination.entity(id).is_some() {
                Relocation::Moved
            } else {
                Relocation::NotFound
            };
        };

        let previous = entity.position;
        entity.position = new;
        if let Err(mut entity) = destination.insert_entity(entity) {
            entity.position = previous;
            if origin.insert_entity(entity).is_err() {
                tracing::error!("Entity {:?} lost while returning to {:?}", id, from);
            }
            tracing::warn!("Relocation of {:?} into {:?} refused", id, to);
            return Relocation::Rejected;
        }
        drop(membership);

        self.regions.move_entity(id, new);
        self.metrics.entity_relocated();
        event_bus::publish(
            &self.bus,
            source,
            vec![
                WorldChange::EntityDespawned {
                    id,
                    big_chunk: from,
                    position: old,
                },
                WorldChange::EntitySpawned {
                    id,
                    big_chunk: to,
                    position: new,
                },
            ],
        );
        Relocation::Relocated { from, to }
    }

    pub fn query_entities_in_range(&self, center: Vec2, radius: f32) -> Vec<EntityId> {
        self.regions.query_range(center, radius)
    }

    pub fn query_entities_in_rect(&self, min: Vec2, max: Vec2) -> Vec<EntityId> {
        self.regions.query_rect(min, max)
    }

    /// One region simulation step, written back into the owning BigChunks.
    pub fn update_regions(&self, dt: f32) -> RegionUpdate {
        let update = self.regions.update_regions(dt);

        for &(id, from, to) in &update.moved {
            match self.move_entity(id, from, to, ChangeSource::Simulation) {
                Relocation::Relocated { .. } | Relocation::Moved => {}
                Relocation::NotFound => {
                    tracing::debug!("Simulated entity {:?} not found in any BigChunk", id);
                }
                Relocation::Rejected => {
                    self.regions.move_entity(id, from);
                    self.regions.set_velocity(id, Vec2::ZERO);
                }
            }
        }
        for &id in &update.deactivated {
            if let Some(big_chunk) = self.locate(id) {
                big_chunk.modify_entity(id, |e| {
                    e.active = false;
                    e.metadata.set("health", 0.0);
                });
            }
        }

        self.metrics.entities_moved(update.moved.len() as u64);
        if update.regions > 0 {
            tracing::debug!(
                "Region update: {} regions, {} entities, {} moved",
                update.regions,
                update.entities,
                update.moved.len()
            );
        }
        update
    }

    // ── Outbound events ──────────────────────────────────────────────────

    pub fn handle_world_event(&self, event: WorldEvent) {
        match event {
            WorldEvent::ChunksSaved { origin, chunks } => {
                if let Some(storage) = self.storage() {
                    if let Err(e) = storage.save_chunks(origin, &chunks) {
                        tracing::error!("Saving chunks of {:?} failed: {:#}", origin, e);
                    }
                }
            }
            WorldEvent::EntitiesSaved { origin, entities } => {
                if let Some(storage) = self.storage() {
                    if let Err(e) = storage.save_entities(origin, &entities) {
                        tracing::error!("Saving entities of {:?} failed: {:#}", origin, e);
                    }
                }
            }
            WorldEvent::ForeignBlock { change, expected, .. } => {
                self.route_block_event(BlockEvent::Change {
                    pos: change.pos,
                    layer: change.layer,
                    block: change.block,
                    expected,
                });
            }
            WorldEvent::ForeignMetadata {
                pos,
                layer,
                key,
                value,
                expected,
                ..
            } => {
                self.route_block_event(BlockEvent::Metadata {
                    pos,
                    layer,
                    key,
                    value,
                    expected,
                });
            }
            WorldEvent::ForeignSchedule { pos, .. } => {
                self.route_block_event(BlockEvent::ScheduleOnce { pos });
            }
            WorldEvent::BlocksChanged { source, changes, .. } => self.commit(source, &changes),
            WorldEvent::EntitySpawned { origin, entity } => self.accept_spawn(origin, entity),
            WorldEvent::EntityMoved { origin, id, from, to } => {
                if origin.contains_block(to.tile()) {
                    self.regions.move_entity(id, to);
                    event_bus::publish(
                        &self.bus,
                        ChangeSource::Routed(origin),
                        vec![WorldChange::EntityMoved { id, from, to }],
                    );
                } else {
                    self.move_entity(id, from, to, ChangeSource::Routed(origin));
                }
            }
            WorldEvent::EntityRemoved { origin, id, position } => {
                self.regions.remove_entity(id);
                event_bus::publish(
                    &self.bus,
                    ChangeSource::Routed(origin),
                    vec![WorldChange::EntityDespawned {
                        id,
                        big_chunk: origin,
                        position,
                    }],
                );
            }
        }
    }

    /// A BigChunk took a routed spawn. If two spawns of one ID raced into
    /// different BigChunks, the one accepted first stays and the later copy
    /// is removed.
    fn accept_spawn(&self, origin: BigChunkPos, entity: Entity) {
        let (id, position) = (entity.id, entity.position);
        {
            let _membership = self.membership.lock();
            let first = self
                .regions
                .get_entity(id)
                .map(|tracked| tracked.position.tile().big_chunk())
                .filter(|holder| *holder != origin)
                .and_then(|holder| self.loaded_big_chunk(holder))
                .is_some_and(|holder| holder.entity(id).is_some());
            if first {
                if let Some(big_chunk) = self.loaded_big_chunk(origin) {
                    big_chunk.remove_entity(id);
                }
                tracing::warn!("Duplicate spawn of {:?} in {:?} removed", id, origin);
                return;
            }
        }

        self.reserve_entity_id(id);
        self.regions.add_entity(entity);
        event_bus::publish(
            &self.bus,
            ChangeSource::Routed(origin),
            vec![WorldChange::EntitySpawned {
                id,
                big_chunk: origin,
                position,
            }],
        );
    }

    /// Drain parked BigChunk queues and the outbound queue until nothing is
    /// left. Returns the number of events handled.
    pub fn pump(&self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut handled = 0;

            let mut parked = std::mem::take(&mut *self.parked.lock());
            for entry in parked.values_mut() {
                handled += entry.big_chunk.drain(&mut entry.inbox);
            }
            self.parked.lock().extend(parked);

            let events: Vec<WorldEvent> = {
                let mut outbox = self.outbox.lock();
                let mut events = Vec::new();
                if let Some(rx) = outbox.as_mut() {
                    while events.len() < OUTBOX_BATCH {
                        match rx.try_recv() {
                            Ok(event) => events.push(event),
                            Err(_) => break,
                        }
                    }
                }
                events
            };
            handled += events.len();
            for event in events {
                self.handle_world_event(event);
            }

            total += handled;
            if handled == 0 {
                break;
            }
        }
        total
    }

    /// Tick every loaded BigChunk once, then [`WorldManager::pump`].
    pub fn tick_all(&self) {
        for big_chunk in self.loaded() {
            big_chunk.process_tick();
        }
        self.pump();
    }

    // ── Saving and lifecycle ─────────────────────────────────────────────

    /// Save every loaded BigChunk. Unforced saves are throttled and go
    /// through each BigChunk's queue; a forced save writes to storage
    /// directly. Returns how many BigChunks were saved or asked to save.
    pub fn save_world(&self, force: bool) -> usize {
        {
            let mut last = self.last_save.lock();
            if !force {
                if let Some(at) = *last {
                    if at.elapsed() < self.config.save_throttle() {
                        tracing::debug!("Save skipped: last save {:?} ago", at.elapsed());
                        return 0;
                    }
                }
            }
            *last = Some(Instant::now());
        }

        let big_chunks = self.loaded();
        let storage = self.storage();
        let with_chunks = storage.as_ref().is_some_and(|s| s.persists_chunks());
        if !with_chunks {
            tracing::debug!("No storage keeps chunks; chunk changes stay dirty");
        }
        if !force {
            return big_chunks
                .iter()
                .filter(|big_chunk| {
                    big_chunk
                        .enqueue(BigChunkEvent::Save { chunks: with_chunks })
                        .is_enqueued()
                })
                .count();
        }

        let Some(storage) = storage else {
            tracing::warn!("Forced save with no storage configured");
            return 0;
        };
        let mut saved = 0;
        for big_chunk in big_chunks {
            let pos = big_chunk.pos();
            let (chunks, pending) = if with_chunks {
                big_chunk.take_dirty_chunks()
            } else {
                (Vec::new(), Vec::new())
            };
            let entities = big_chunk.entities();
            self.metrics.save_issued();
            let result = storage
                .save_chunks(pos, &chunks)
                .and_then(|()| storage.save_entities(pos, &entities));
            match result {
                Ok(()) => saved += 1,
                Err(e) => {
                    tracing::error!("Saving {:?} failed: {:#}", pos, e);
                    big_chunk.restore_changes(pending);
                }
            }
        }
        saved
    }

    /// Spawn the world loop: outbound events, autosave and region updates.
    /// Returns `false` without a runtime or if already started.
    pub fn start(self: &Arc<Self>) -> bool {
        let Some(runtime) = self.runtime.as_ref() else {
            return false;
        };
        let Some(outbox) = self.outbox.lock().take() else {
            return false;
        };
        let task = runtime.spawn(Arc::clone(self).run(outbox));
        *self.task.lock() = Some(task);
        true
    }

    async fn run(self: Arc<Self>, mut outbox: mpsc::Receiver<WorldEvent>) {
        let mut autosave = tokio::time::interval(self.config.autosave_interval());
        autosave.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of each interval is immediate; skip it.
        autosave.tick().await;
        let mut regions = tokio::time::interval(self.config.region_interval());
        regions.set_missed_tick_behavior(MissedTickBehavior::Skip);
        regions.tick().await;
        let dt = self.config.region_interval().as_secs_f32();

        tracing::info!("World loop started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = outbox.recv() => match event {
                    Some(event) => self.handle_world_event(event),
                    None => break,
                },
                _ = autosave.tick() => {
                    tracing::info!("Autosaving...");
                    let requested = self.save_world(false);
                    tracing::info!("Autosave requested from {} BigChunks", requested);
                }
                _ = regions.tick() => {
                    self.update_regions(dt);
                }
            }
        }

        while let Ok(event) = outbox.try_recv() {
            self.handle_world_event(event);
        }
        tracing::info!("World loop stopped");
    }

    /// Stop every task, then save everything synchronously.
    pub async fn shutdown(&self) -> usize {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("World loop ended abnormally: {}", e);
            }
        }
        self.pump();
        let saved = self.save_world(true);
        tracing::info!("Shutdown save: {} BigChunks", saved);
        saved
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.big_chunks.len() as u64, self.regions.entity_count() as u64)
    }
}
