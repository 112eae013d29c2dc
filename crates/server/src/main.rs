use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tilerealm_engine::entity::EntityKind;
use tilerealm_engine::world::ChunkGenerator;
use tilerealm_engine::world::block::Block;
use tilerealm_engine::world::meta::Metadata;
use tilerealm_engine::world::position::{BigChunkPos, BlockPos, ChunkPos, Vec2};
use tilerealm_server::block;
use tilerealm_server::config::WorldConfig;
use tilerealm_server::generator::{FlatGenerator, TerrainGenerator};
use tilerealm_server::storage::JsonDirStorage;
use tilerealm_server::world_manager::WorldManager;

/// How long the demo lets the world run.
const DEMO_DURATION: Duration = Duration::from_secs(5);

fn arg(name: &str) -> Option<String> {
    std::env::args().skip_while(|a| a != name).nth(1)
}

#[tokio::main]
async fn main() -> Result<()> {
    let demo_mode = std::env::args().any(|a| a == "--demo");
    let flat = std::env::args().any(|a| a == "--flat");
    let world_dir: PathBuf = arg("--world").unwrap_or_else(|| "world".into()).into();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = match arg("--config") {
        Some(path) => WorldConfig::load(Path::new(&path))?,
        None => WorldConfig::default(),
    };
    if let Some(seed) = arg("--seed") {
        config.seed = seed.parse().with_context(|| format!("invalid --seed {seed}"))?;
    }
    if let Some(workers) = arg("--workers") {
        config.region_workers = Some(workers.parse().with_context(|| format!("invalid --workers {workers}"))?);
    }

    tracing::info!("Tilerealm -- tile world server");

    let registry = Arc::new(block::standard_registry());
    let generator: Arc<dyn ChunkGenerator> = if flat {
        Arc::new(FlatGenerator)
    } else {
        Arc::new(TerrainGenerator::new(config.seed))
    };
    let world = WorldManager::new(config, registry, generator)?;

    if demo_mode {
        return run_demo(&world).await;
    }

    let storage = JsonDirStorage::open(&world_dir)?;
    world.set_storage(Arc::new(storage));
    tracing::info!("Entity storage at {}", world_dir.display());

    // Warm up the spawn area.
    let spawn = world.big_chunk(BigChunkPos::new(0, 0));
    for cx in -2..2 {
        for cy in -2..2 {
            spawn.ensure_chunk(ChunkPos::new(cx, cy));
        }
    }
    tracing::info!("Spawn area ready: {} chunks", spawn.loaded_chunks());

    world.start();

    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    tracing::info!("Ctrl+C received, shutting down...");

    // ── Save on shutdown ─────────────────────────────────────────────────
    tracing::info!("Saving world before exit...");
    let saved = world.shutdown().await;
    tracing::info!("Shutdown save complete: {} BigChunks written", saved);
    Ok(())
}

/// Spawn a few wandering NPCs near the origin, let the world run, then print
/// the counters.
async fn run_demo(world: &Arc<WorldManager>) -> Result<()> {
    tracing::info!("Demo: seed {}", world.config().seed);
    world.start();

    let mut spawned = 0;
    for i in 0..16 {
        let position = Vec2::new(8.5 + (i % 4) as f32 * 3.0, 8.5 + (i / 4) as f32 * 3.0);
        if !world.registry().is_passable(world.get_block(position.tile()).id) {
            continue;
        }
        let metadata = Metadata::new().with("health", 20i64).with("name", format!("npc-{i}"));
        if world.spawn_entity(EntityKind::Npc, position, metadata).is_some() {
            spawned += 1;
        }
    }
    tracing::info!("Spawned {} NPCs", spawned);

    let water = BlockPos::new(2, 2);
    world.set_block(water, Block::new(block::WATER));
    tracing::info!("Placed water at {:?}", water);

    tokio::time::sleep(DEMO_DURATION).await;

    let snapshot = world.metrics();
    println!("{}", serde_json::to_string_pretty(&snapshot).context("serializing metrics")?);
    world.shutdown().await;
    Ok(())
}
