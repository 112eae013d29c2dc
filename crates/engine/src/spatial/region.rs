use super::index::{DEFAULT_CELL_SIZE, SpatialIndex};
use crate::entity::{Entity, EntityId};
use crate::world::meta::MetaValue;
use crate::world::position::{CHUNK_SHIFT, Vec2};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Velocities below this magnitude snap to zero after friction.
const REST_SPEED_SQ: f32 = 1e-4;

/// Coordinate of a region (`region_size` x `region_size` chunks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionPos {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Region edge length in chunks.
    pub region_size: i32,
    pub cell_size: f32,
    pub workers: usize,
    /// Velocity multiplier applied once per update.
    pub friction: f32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            region_size: 4,
            cell_size: DEFAULT_CELL_SIZE,
            workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
            friction: 0.9,
        }
    }
}

struct RegionState {
    entities: HashMap<EntityId, Entity>,
    dirty: bool,
}

/// A coarse grouping of chunks with its own entity table and index.
pub struct Region {
    pos: RegionPos,
    index: SpatialIndex,
    state: Mutex<RegionState>,
}

impl Region {
    fn new(pos: RegionPos, cell_size: f32) -> Self {
        Self {
            pos,
            index: SpatialIndex::new(cell_size),
            state: Mutex::new(RegionState {
                entities: HashMap::new(),
                dirty: false,
            }),
        }
    }

    pub fn pos(&self) -> RegionPos {
        self.pos
    }

    pub fn entity_count(&self) -> usize {
        self.state.lock().entities.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }
}

/// Summary of one [`RegionManager::update_regions`] pass.
#[derive(Debug, Default)]
pub struct RegionUpdate {
    pub regions: usize,
    pub entities: usize,
    /// `(id, old, new)` for every entity whose position changed.
    pub moved: Vec<(EntityId, Vec2, Vec2)>,
    /// Entities flagged inactive this pass (health reached zero).
    pub deactivated: Vec<EntityId>,
}

struct RegionOutcome {
    entities: usize,
    moved: Vec<(EntityId, Vec2, Vec2)>,
    deactivated: Vec<EntityId>,
}

/// Parallel entity simulation over coarse regions.
///
/// Lock order: `entity_region` -> `regions` -> a region's state -> its index
/// cells. Workers only ever take the last two; migrations between regions
/// are applied after the worker pass.
pub struct RegionManager {
    config: RegionConfig,
    regions: RwLock<HashMap<RegionPos, Arc<Region>>>,
    entity_region: RwLock<HashMap<EntityId, RegionPos>>,
    pool: rayon::ThreadPool,
}

impl RegionManager {
    pub fn new(config: RegionConfig) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("region-worker-{i}"))
            .build()?;
        tracing::debug!(
            "Region manager: {} workers, {}-chunk regions",
            config.workers.max(1),
            config.region_size
        );
        Ok(Self {
            config,
            regions: RwLock::new(HashMap::new()),
            entity_region: RwLock::new(HashMap::new()),
            pool,
        })
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Region owning a continuous position: floor-divide the chunk
    /// coordinate by the region size.
    pub fn region_of(&self, position: Vec2) -> RegionPos {
        let tile = position.tile();
        let size = self.config.region_size.max(1);
        RegionPos {
            x: (tile.x >> CHUNK_SHIFT).div_euclid(size),
            y: (tile.y >> CHUNK_SHIFT).div_euclid(size),
        }
    }

    fn region_or_create(&self, pos: RegionPos) -> Arc<Region> {
        if let Some(region) = self.regions.read().get(&pos) {
            return Arc::clone(region);
        }
        let mut regions = self.regions.write();
        Arc::clone(
            regions
                .entry(pos)
                .or_insert_with(|| Arc::new(Region::new(pos, self.config.cell_size))),
        )
    }

    fn region(&self, pos: RegionPos) -> Option<Arc<Region>> {
        self.regions.read().get(&pos).cloned()
    }

    fn insert_into(region: &Region, entity: Entity) {
        let mut state = region.state.lock();
        region.index.insert(entity.id, entity.position, entity.size);
        state.entities.insert(entity.id, entity);
        state.dirty = true;
    }

    fn take_from(region: &Region, id: EntityId) -> Option<Entity> {
        let mut state = region.state.lock();
        let entity = state.entities.remove(&id)?;
        region.index.remove(id);
        state.dirty = true;
        Some(entity)
    }

    /// Add an entity. Returns `false` (and replaces the stored copy) if the
    /// ID was already tracked.
    pub fn add_entity(&self, entity: Entity) -> bool {
        let mut entity_region = self.entity_region.write();
        let id = entity.id;
        let target = self.region_of(entity.position);
        let fresh = match entity_region.get(&id).copied() {
            Some(old) => {
                if let Some(region) = self.region(old) {
                    Self::take_from(&region, id);
                }
                false
            }
            None => true,
        };
        Self::insert_into(&self.region_or_create(target), entity);
        entity_region.insert(id, target);
        fresh
    }

    pub fn remove_entity(&self, id: EntityId) -> Option<Entity> {
        let mut entity_region = self.entity_region.write();
        let pos = entity_region.remove(&id)?;
        let region = self.region(pos)?;
        Self::take_from(&region, id)
    }

    /// Move an entity, migrating it only if its region changed.
    pub fn move_entity(&self, id: EntityId, position: Vec2) -> bool {
        let mut entity_region = self.entity_region.write();
        let Some(old) = entity_region.get(&id).copied() else {
            return false;
        };
        let Some(old_region) = self.region(old) else {
            return false;
        };
        let target = self.region_of(position);

        if target == old {
            let mut state = old_region.state.lock();
            let Some(entity) = state.entities.get_mut(&id) else {
                return false;
            };
            entity.position = position;
            old_region.index.update(id, position, entity.size);
            state.dirty = true;
            return true;
        }

        let Some(mut entity) = Self::take_from(&old_region, id) else {
            return false;
        };
        entity.position = position;
        Self::insert_into(&self.region_or_create(target), entity);
        entity_region.insert(id, target);
        true
    }

    /// Apply `f` to the stored copy of an entity and mark its region dirty.
    pub fn modify_entity<R>(&self, id: EntityId, f: impl FnOnce(&mut Entity) -> R) -> Option<R> {
        let entity_region = self.entity_region.read();
        let region = self.region(*entity_region.get(&id)?)?;
        let mut state = region.state.lock();
        let entity = state.entities.get_mut(&id)?;
        let out = f(entity);
        state.dirty = true;
        Some(out)
    }

    pub fn set_velocity(&self, id: EntityId, velocity: Vec2) -> bool {
        self.modify_entity(id, |e| e.velocity = velocity).is_some()
    }

    pub fn get_entity(&self, id: EntityId) -> Option<Entity> {
        let entity_region = self.entity_region.read();
        let region = self.region(*entity_region.get(&id)?)?;
        let state = region.state.lock();
        state.entities.get(&id).cloned()
    }

    pub fn region_of_entity(&self, id: EntityId) -> Option<RegionPos> {
        self.entity_region.read().get(&id).copied()
    }

    /// Integrate every dirty region on the worker pool, then migrate
    /// entities that left their region.
    pub fn update_regions(&self, dt: f32) -> RegionUpdate {
        let dirty: Vec<Arc<Region>> = self
            .regions
            .read()
            .values()
            .filter(|r| r.is_dirty())
            .cloned()
            .collect();
        if dirty.is_empty() {
            return RegionUpdate::default();
        }

        let friction = self.config.friction;
        let outcomes: Vec<RegionOutcome> = self.pool.install(|| {
            dirty
                .par_iter()
                .map(|region| update_region(region, dt, friction))
                .collect()
        });

        let mut summary = RegionUpdate {
            regions: dirty.len(),
            ..RegionUpdate::default()
        };
        for outcome in outcomes {
            summary.entities += outcome.entities;
            summary.moved.extend(outcome.moved);
            summary.deactivated.extend(outcome.deactivated);
        }

        for (id, _, new) in &summary.moved {
            if self.region_of_entity(*id) != Some(self.region_of(*new)) {
                self.move_entity(*id, *new);
            }
        }
        summary
    }

    /// Entities within `radius` of `center`, across every overlapping region.
    pub fn query_range(&self, center: Vec2, radius: f32) -> Vec<EntityId> {
        let min = Vec2::new(center.x - radius, center.y - radius);
        let max = Vec2::new(center.x + radius, center.y + radius);
        self.collect(min, max, |index| index.query_range(center, radius))
    }

    pub fn query_rect(&self, min: Vec2, max: Vec2) -> Vec<EntityId> {
        self.collect(min, max, |index| index.query_rect(min, max))
    }

    fn collect(&self, min: Vec2, max: Vec2, query: impl Fn(&SpatialIndex) -> Vec<EntityId>) -> Vec<EntityId> {
        if !(min.x <= max.x && min.y <= max.y) {
            return Vec::new();
        }
        let lo = self.region_of(min);
        let hi = self.region_of(max);
        let regions: Vec<Arc<Region>> = {
            let map = self.regions.read();
            map.iter()
                .filter(|(p, _)| p.x >= lo.x && p.x <= hi.x && p.y >= lo.y && p.y <= hi.y)
                .map(|(_, r)| Arc::clone(r))
                .collect()
        };
        let mut hits: Vec<EntityId> = regions.iter().flat_map(|r| query(&r.index)).collect();
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    /// Sum of entities over all regions.
    pub fn entity_count(&self) -> usize {
        self.regions.read().values().map(|r| r.entity_count()).sum()
    }

    pub fn region_count(&self) -> usize {
        self.regions.read().len()
    }

    pub fn dirty_region_count(&self) -> usize {
        self.regions.read().values().filter(|r| r.is_dirty()).count()
    }
}

/// Integrate one region. Runs on a pool worker with only this region locked.
fn update_region(region: &Region, dt: f32, friction: f32) -> RegionOutcome {
    let mut state = region.state.lock();
    let mut outcome = RegionOutcome {
        entities: state.entities.len(),
        moved: Vec::new(),
        deactivated: Vec::new(),
    };
    let mut still_busy = false;

    for entity in state.entities.values_mut() {
        if !entity.active {
            continue;
        }

        if entity.is_moving() {
            let old = entity.position;
            entity.position = old.add(entity.velocity.scale(dt));
            entity.velocity = entity.velocity.scale(friction);
            if entity.velocity.length_squared() < REST_SPEED_SQ {
                entity.velocity = Vec2::ZERO;
            }
            region.index.update(entity.id, entity.position, entity.size);
            outcome.moved.push((entity.id, old, entity.position));
        }

        for effect in &mut entity.effects {
            effect.remaining -= dt;
        }
        entity.effects.retain(|e| e.remaining > 0.0);

        if entity.health().is_some_and(|h| h <= 0.0) {
            entity.active = false;
            entity.velocity = Vec2::ZERO;
            entity.metadata.set("health", MetaValue::Float(0.0));
            outcome.deactivated.push(entity.id);
            continue;
        }

        still_busy |= entity.is_moving() || !entity.effects.is_empty();
    }

    state.dirty = still_busy;
    outcome
}
