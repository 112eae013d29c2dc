use crate::entity::EntityId;
use crate::world::chunk::CHUNK_SIZE;
use crate::world::position::{Aabb, Vec2};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Default cell edge length: one chunk.
pub const DEFAULT_CELL_SIZE: f32 = CHUNK_SIZE as f32;

/// Integer coordinate of a grid cell.
pub type GridCell = (i32, i32);

struct IndexEntry {
    position: Vec2,
    cells: Vec<GridCell>,
}

/// Uniform spatial hash for entity proximity queries.
///
/// Each entity is filed under every cell its bounding box overlaps; a
/// reverse map remembers those cells so moves and removals only touch the
/// cells involved. Cell membership over-approximates, so queries always
/// finish with an exact test against the entity's position.
///
/// Locking: `entries` is taken before any cell shard. Queries read cells
/// first and release them before reading `entries`, so the two orders never
/// nest in opposite directions.
pub struct SpatialIndex {
    cell_size: f32,
    cells: DashMap<GridCell, HashSet<EntityId>>,
    entries: RwLock<HashMap<EntityId, IndexEntry>>,
}

impl SpatialIndex {
    /// Non-positive or non-finite sizes fall back to [`DEFAULT_CELL_SIZE`].
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            DEFAULT_CELL_SIZE
        };
        Self {
            cell_size,
            cells: DashMap::new(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Saturates at the `i32` range, so infinite bounds clamp.
    #[inline]
    fn cell_of(&self, v: f32) -> i32 {
        (v / self.cell_size).floor() as i32
    }

    fn cell_span(&self, min: Vec2, max: Vec2) -> (GridCell, GridCell) {
        (
            (self.cell_of(min.x), self.cell_of(min.y)),
            (self.cell_of(max.x), self.cell_of(max.y)),
        )
    }

    /// Number of cells in the span, or `None` past `u64`.
    fn span_len(((x0, y0), (x1, y1)): (GridCell, GridCell)) -> Option<u64> {
        let width = (i64::from(x1) - i64::from(x0) + 1).max(0) as u64;
        let height = (i64::from(y1) - i64::from(y0) + 1).max(0) as u64;
        width.checked_mul(height)
    }

    fn cells_covering(&self, min: Vec2, max: Vec2) -> Vec<GridCell> {
        let span = self.cell_span(min, max);
        let ((x0, y0), (x1, y1)) = span;
        let capacity = Self::span_len(span).map_or(1, |n| n.clamp(1, 64) as usize);
        let mut cells = Vec::with_capacity(capacity);
        for cy in y0..=y1 {
            for cx in x0..=x1 {
                cells.push((cx, cy));
            }
        }
        cells
    }

    fn add_to_cell(&self, cell: GridCell, id: EntityId) {
        self.cells.entry(cell).or_default().insert(id);
    }

    fn remove_from_cell(&self, cell: GridCell, id: EntityId) {
        let now_empty = match self.cells.get_mut(&cell) {
            Some(mut set) => {
                set.remove(&id);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.cells.remove_if(&cell, |_, set| set.is_empty());
        }
    }

    /// Insert an entity. Inserting an ID that is already present moves it.
    pub fn insert(&self, id: EntityId, position: Vec2, size: Vec2) {
        let bounds = Aabb::centered(position, size);
        let cells = self.cells_covering(bounds.min, bounds.max);
        let mut entries = self.entries.write();
        if let Some(old) = entries.remove(&id) {
            for cell in &old.cells {
                self.remove_from_cell(*cell, id);
            }
        }
        for cell in &cells {
            self.add_to_cell(*cell, id);
        }
        entries.insert(id, IndexEntry { position, cells });
    }

    /// Move an entity, touching only the cells that changed membership.
    /// Returns `false` if the entity is not indexed.
    pub fn update(&self, id: EntityId, position: Vec2, size: Vec2) -> bool {
        let bounds = Aabb::centered(position, size);
        let new_cells = self.cells_covering(bounds.min, bounds.max);
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };

        for cell in entry.cells.iter().filter(|c| !new_cells.contains(c)) {
            self.remove_from_cell(*cell, id);
        }
        for cell in new_cells.iter().filter(|c| !entry.cells.contains(c)) {
            self.add_to_cell(*cell, id);
        }
        entry.position = position;
        entry.cells = new_cells;
        true
    }

    pub fn remove(&self, id: EntityId) -> bool {
        let mut entries = self.entries.write();
        match entries.remove(&id) {
            Some(entry) => {
                for cell in &entry.cells {
                    self.remove_from_cell(*cell, id);
                }
                true
            }
            None => false,
        }
    }

    /// Entities filed under any cell of the box. A box covering more cells
    /// than are occupied walks the occupied cells instead.
    fn candidates(&self, min: Vec2, max: Vec2) -> HashSet<EntityId> {
        let span = self.cell_span(min, max);
        let mut found = HashSet::new();
        let occupied = self.cells.len() as u64;
        if Self::span_len(span).is_none_or(|n| n > occupied) {
            let ((x0, y0), (x1, y1)) = span;
            for entry in self.cells.iter() {
                let (cx, cy) = *entry.key();
                if (x0..=x1).contains(&cx) && (y0..=y1).contains(&cy) {
                    found.extend(entry.value().iter().copied());
                }
            }
            return found;
        }
        for cell in self.cells_covering(min, max) {
            if let Some(set) = self.cells.get(&cell) {
                found.extend(set.iter().copied());
            }
        }
        found
    }

    /// Entities whose position lies within `radius` of `center`, sorted by ID.
    pub fn query_range(&self, center: Vec2, radius: f32) -> Vec<EntityId> {
        if !(radius >= 0.0) {
            return Vec::new();
        }
        let min = Vec2::new(center.x - radius, center.y - radius);
        let max = Vec2::new(center.x + radius, center.y + radius);
        let candidates = self.candidates(min, max);

        let radius_sq = radius * radius;
        let entries = self.entries.read();
        let mut hits: Vec<EntityId> = candidates
            .into_iter()
            .filter(|id| {
                entries
                    .get(id)
                    .is_some_and(|e| e.position.distance_squared(center) <= radius_sq)
            })
            .collect();
        hits.sort_unstable();
        hits
    }

    /// Entities whose position lies inside `[min, max]`, sorted by ID.
    pub fn query_rect(&self, min: Vec2, max: Vec2) -> Vec<EntityId> {
        if min.x > max.x || min.y > max.y {
            return Vec::new();
        }
        let candidates = self.candidates(min, max);
        let rect = Aabb::new(min, max);
        let entries = self.entries.read();
        let mut hits: Vec<EntityId> = candidates
            .into_iter()
            .filter(|id| entries.get(id).is_some_and(|e| rect.contains(e.position)))
            .collect();
        hits.sort_unstable();
        hits
    }

    pub fn position_of(&self, id: EntityId) -> Option<Vec2> {
        self.entries.read().get(&id).map(|e| e.position)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.read().contains_key(&id)
    }

    pub fn get_entity_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Number of cells currently holding at least one entity.
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}
