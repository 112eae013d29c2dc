use super::{BlockBehavior, Capabilities};
use crate::world::block::BlockId;
use std::collections::HashMap;
use std::sync::Arc;

struct Registered {
    behavior: Arc<dyn BlockBehavior>,
    capabilities: Capabilities,
}

/// Maps block IDs to their behavior singletons.
///
/// Built once at start-up, then shared as `Arc<BlockRegistry>` and never
/// mutated again. Capabilities are captured at registration so hot paths
/// (tick bookkeeping, collision) never call back into the behavior.
///
/// Unregistered IDs are not an error: lookups return `None` and the cached
/// queries fall back to "no tick, not passable, not interactable" -- except
/// Air, which is always passable.
pub struct BlockRegistry {
    entries: HashMap<BlockId, Registered>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `behavior` under `id`. Last write wins.
    pub fn register(&mut self, id: BlockId, behavior: Arc<dyn BlockBehavior>) {
        if behavior.id() != id {
            tracing::warn!(
                "Behavior '{}' reports id {:?} but is registered as {:?}",
                behavior.name(),
                behavior.id(),
                id
            );
        }
        let capabilities = behavior.capabilities();
        let previous = self.entries.insert(id, Registered { behavior, capabilities });
        if let Some(previous) = previous {
            tracing::debug!("Replaced behavior '{}' for {:?}", previous.behavior.name(), id);
        }
    }

    /// Register a behavior under its own ID.
    pub fn add(&mut self, behavior: impl BlockBehavior + 'static) {
        let id = behavior.id();
        self.register(id, Arc::new(behavior));
    }

    pub fn get(&self, id: BlockId) -> Option<&Arc<dyn BlockBehavior>> {
        self.entries.get(&id).map(|r| &r.behavior)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn capabilities(&self, id: BlockId) -> Capabilities {
        match self.entries.get(&id) {
            Some(r) => r.capabilities,
            None if id == BlockId::AIR => Capabilities::NONE.passable(),
            None => Capabilities::NONE,
        }
    }

    pub fn needs_tick(&self, id: BlockId) -> bool {
        self.capabilities(id).tickable
    }

    pub fn is_passable(&self, id: BlockId) -> bool {
        self.capabilities(id).passable
    }

    pub fn is_interactable(&self, id: BlockId) -> bool {
        self.capabilities(id).interactable
    }

    pub fn name(&self, id: BlockId) -> &'static str {
        self.get(id).map(|b| b.name()).unwrap_or("unknown")
    }

    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(u16, Capabilities);

    impl BlockBehavior for Dummy {
        fn id(&self) -> BlockId {
            BlockId(self.0)
        }
        fn name(&self) -> &'static str {
            "dummy"
        }
        fn capabilities(&self) -> Capabilities {
            self.1
        }
    }

    #[test]
    fn unknown_ids_degrade_to_inert() {
        let registry = BlockRegistry::new();
        assert!(registry.get(BlockId(42)).is_none());
        assert!(!registry.needs_tick(BlockId(42)));
        assert!(!registry.is_passable(BlockId(42)));
        assert!(registry.is_passable(BlockId::AIR));
        assert_eq!(registry.name(BlockId(42)), "unknown");
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = BlockRegistry::new();
        registry.add(Dummy(7, Capabilities::NONE));
        registry.add(Dummy(7, Capabilities::NONE.tickable()));
        assert_eq!(registry.len(), 1);
        assert!(registry.needs_tick(BlockId(7)));
    }
}
