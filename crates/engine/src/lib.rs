pub mod behavior;
pub mod entity;
pub mod spatial;
pub mod world;

pub use behavior::api::BlockApi;
pub use behavior::registry::BlockRegistry;
pub use behavior::{BlockBehavior, Capabilities, Interaction, InteractionResult};
pub use entity::{Entity, EntityId, EntityKind};
pub use world::block::{Block, BlockId, BlockLayer};
pub use world::meta::{MetaValue, Metadata};
pub use world::position::{BigChunkPos, BlockPos, ChunkPos, LocalPos, Vec2};
