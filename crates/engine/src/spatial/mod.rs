//! Entity placement: a uniform-grid index and the region simulation built
//! on top of it.

pub mod index;
pub mod region;

pub use index::SpatialIndex;
pub use region::{RegionConfig, RegionManager, RegionPos, RegionUpdate};
