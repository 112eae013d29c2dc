//! Entity storage backends: in-memory and one JSON file per BigChunk.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tilerealm_engine::entity::Entity;
use tilerealm_engine::world::chunk::Chunk;
use tilerealm_engine::world::position::BigChunkPos;

use crate::collab::EntityStorage;

/// Keeps the last saved entity list per BigChunk in memory.
#[derive(Default)]
pub struct MemoryStorage {
    entities: Mutex<HashMap<BigChunkPos, Vec<Entity>>>,
    chunk_saves: Mutex<HashMap<BigChunkPos, usize>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self, big_chunk: BigChunkPos) -> Option<Vec<Entity>> {
        self.entities.lock().get(&big_chunk).cloned()
    }

    /// Total chunks handed to `save_chunks` for this BigChunk.
    pub fn chunks_saved(&self, big_chunk: BigChunkPos) -> usize {
        self.chunk_saves.lock().get(&big_chunk).copied().unwrap_or(0)
    }

    pub fn preload(&self, big_chunk: BigChunkPos, entities: Vec<Entity>) {
        self.entities.lock().insert(big_chunk, entities);
    }
}

impl EntityStorage for MemoryStorage {
    fn save_entities(&self, big_chunk: BigChunkPos, entities: &[Entity]) -> Result<()> {
        self.entities.lock().insert(big_chunk, entities.to_vec());
        Ok(())
    }

    fn load_entities(&self, big_chunk: BigChunkPos) -> Result<Option<Vec<Entity>>> {
        Ok(self.saved(big_chunk))
    }

    fn save_chunks(&self, big_chunk: BigChunkPos, chunks: &[Chunk]) -> Result<()> {
        *self.chunk_saves.lock().entry(big_chunk).or_default() += chunks.len();
        Ok(())
    }
}

/// Writes `<dir>/entities/b.<x>.<y>.json`.
pub struct JsonDirStorage {
    dir: PathBuf,
}

impl JsonDirStorage {
    pub fn open(dir: &Path) -> Result<Self> {
        let entities = dir.join("entities");
        fs::create_dir_all(&entities)
            .with_context(|| format!("creating {}", entities.display()))?;
        Ok(Self { dir: entities })
    }

    fn path(&self, big_chunk: BigChunkPos) -> PathBuf {
        self.dir.join(format!("b.{}.{}.json", big_chunk.x, big_chunk.y))
    }
}

impl EntityStorage for JsonDirStorage {
    fn save_entities(&self, big_chunk: BigChunkPos, entities: &[Entity]) -> Result<()> {
        let path = self.path(big_chunk);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_vec(entities).context("serializing entities")?;
        fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    fn load_entities(&self, big_chunk: BigChunkPos) -> Result<Option<Vec<Entity>>> {
        let path = self.path(big_chunk);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let entities = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(entities))
    }

    /// Chunks regenerate from the seed; their edits are not written here.
    fn persists_chunks(&self) -> bool {
        false
    }
}
