//! World configuration, loadable from JSON with per-field defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tilerealm_engine::spatial::RegionConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub seed: u64,
    /// BigChunk tick rate.
    pub tick_hz: u32,
    /// Region simulation rate.
    pub region_tick_hz: u32,
    pub autosave_secs: u64,
    /// Minimum spacing between unforced saves.
    pub save_throttle_secs: u64,
    pub big_chunk_queue: usize,
    pub world_queue: usize,
    /// Region edge length in chunks.
    pub region_size: i32,
    pub spatial_cell_size: f32,
    /// Region worker threads; `None` means one per CPU core.
    pub region_workers: Option<usize>,
    pub friction: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            tick_hz: 60,
            region_tick_hz: 20,
            autosave_secs: 300,
            save_throttle_secs: 60,
            big_chunk_queue: 1024,
            world_queue: 4096,
            region_size: 4,
            spatial_cell_size: 16.0,
            region_workers: None,
            friction: 0.9,
        }
    }
}

fn period(hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / hz.max(1) as f64)
}

impl WorldConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn tick_interval(&self) -> Duration {
        period(self.tick_hz)
    }

    pub fn region_interval(&self) -> Duration {
        period(self.region_tick_hz)
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_secs.max(1))
    }

    pub fn save_throttle(&self) -> Duration {
        Duration::from_secs(self.save_throttle_secs)
    }

    pub fn region_config(&self) -> RegionConfig {
        let defaults = RegionConfig::default();
        RegionConfig {
            region_size: self.region_size.max(1),
            cell_size: self.spatial_cell_size,
            workers: self.region_workers.unwrap_or(defaults.workers),
            friction: self.friction,
        }
    }
}
