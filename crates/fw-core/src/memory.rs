use std::num::NonZeroUsize;

use lru::LruCache;
use serde_json::Value;

/// Default number of entries kept by [`LruMemory`].
pub const DEFAULT_MEMORY_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Memory trait
// ---------------------------------------------------------------------------

/// Per-agent key/value memory.
///
/// Implementations are owned by a single agent and only touched while that
/// agent's lock is held, so methods take `&mut self`.
pub trait Memory: Send + Sync {
    /// Implementation name as registered in the component registry.
    fn kind(&self) -> &str;

    fn get(&mut self, key: &str) -> Option<Value>;

    fn set(&mut self, key: &str, value: Value);

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries ordered from least to most recently used, for snapshots.
    fn entries(&self) -> Vec<(String, Value)>;
}

// ---------------------------------------------------------------------------
// LruMemory
// ---------------------------------------------------------------------------

/// Bounded least-recently-used map. Reading a key refreshes it.
pub struct LruMemory {
    cache: LruCache<String, Value>,
}

impl LruMemory {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}

impl Default for LruMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl Memory for LruMemory {
    fn kind(&self) -> &str {
        "lru"
    }

    fn get(&mut self, key: &str) -> Option<Value> {
        self.cache.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.cache.put(key.to_string(), value);
    }

    fn clear(&mut self) {
        self.cache.clear();
    }

    fn len(&self) -> usize {
        self.cache.len()
    }

    fn entries(&self) -> Vec<(String, Value)> {
        // `iter` walks most recent first.
        let mut out: Vec<(String, Value)> = self
            .cache
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.reverse();
        out
    }
}
