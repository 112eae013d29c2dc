pub mod behaviors;
pub mod big_chunk;
pub mod block;
pub mod collab;
pub mod config;
pub mod event_bus;
pub mod events;
pub mod generator;
pub mod metrics;
pub mod storage;
pub mod world_manager;
