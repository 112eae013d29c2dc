//! The single entity representation shared by BigChunks and the region
//! simulation.

use crate::world::meta::Metadata;
use crate::world::position::{Aabb, Vec2};
use serde::{Deserialize, Serialize};

/// Globally unique entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// What kind of thing an entity is. Drives per-tick AI dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Player,
    Npc,
    Monster,
    Item,
    Other(u16),
}

impl EntityKind {
    /// Wire/storage type code.
    pub const fn code(self) -> u16 {
        match self {
            EntityKind::Player => 0,
            EntityKind::Npc => 1,
            EntityKind::Monster => 2,
            EntityKind::Item => 3,
            EntityKind::Other(code) => code,
        }
    }

    pub const fn from_code(code: u16) -> Self {
        match code {
            0 => EntityKind::Player,
            1 => EntityKind::Npc,
            2 => EntityKind::Monster,
            3 => EntityKind::Item,
            other => EntityKind::Other(other),
        }
    }
}

/// A named effect that expires after `remaining` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEffect {
    pub name: String,
    pub remaining: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Center of the entity, in tile units.
    pub position: Vec2,
    pub velocity: Vec2,
    pub size: Vec2,
    pub metadata: Metadata,
    pub effects: Vec<TimedEffect>,
    pub active: bool,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind, position: Vec2) -> Self {
        let size = match kind {
            EntityKind::Item => Vec2::new(0.5, 0.5),
            _ => Vec2::new(0.8, 0.8),
        };
        Self {
            id,
            kind,
            position,
            velocity: Vec2::ZERO,
            size,
            metadata: Metadata::new(),
            effects: Vec::new(),
            active: true,
        }
    }

    pub fn with_size(mut self, size: Vec2) -> Self {
        self.size = size;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::centered(self.position, self.size)
    }

    /// Bounds the entity would have at `position`.
    pub fn bounds_at(&self, position: Vec2) -> Aabb {
        Aabb::centered(position, self.size)
    }

    pub fn health(&self) -> Option<f64> {
        self.metadata.get_float("health")
    }

    /// Still needs kinematic integration.
    pub fn is_moving(&self) -> bool {
        self.velocity != Vec2::ZERO
    }
}
