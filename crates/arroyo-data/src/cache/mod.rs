//! Query result caching
//!
//! Pages are keyed by the full [`QueryDescriptor`], compared structurally.
//! Entries are immutable: a refetch supersedes an entry instead of
//! updating it.

mod eviction;

pub use eviction::{EvictionPolicy, LeastRecentlyFetched};

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use arroyo_core::{QueryDescriptor, ResponsePage};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// A successful response and when it was fetched
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub descriptor: QueryDescriptor,
    pub response: Arc<ResponsePage>,
    pub fetched_at: Instant,
}

impl CacheEntry {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// Whether the entry can be served without a refetch
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.age() < window
    }
}

/// Bounded store of the last successful response per descriptor
pub struct ResultCache {
    entries: Arc<RwLock<AHashMap<QueryDescriptor, CacheEntry>>>,
    max_entries: usize,
    policy: Box<dyn EvictionPolicy>,
}

impl ResultCache {
    /// Create a cache evicting the least recently fetched pages
    pub fn new(max_entries: usize) -> Self {
        Self::with_policy(max_entries, Box::new(LeastRecentlyFetched))
    }

    pub fn with_policy(max_entries: usize, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(AHashMap::new())),
            max_entries: max_entries.max(1),
            policy,
        }
    }

    pub fn get(&self, descriptor: &QueryDescriptor) -> Option<CacheEntry> {
        self.entries.read().get(descriptor).cloned()
    }

    /// Store a response, superseding any entry for the same descriptor
    pub fn put(&self, descriptor: QueryDescriptor, response: Arc<ResponsePage>) -> CacheEntry {
        let entry = CacheEntry {
            descriptor: descriptor.clone(),
            response,
            fetched_at: Instant::now(),
        };

        let mut entries = self.entries.write();
        if !entries.contains_key(&descriptor) && entries.len() >= self.max_entries {
            let excess = entries.len() + 1 - self.max_entries;
            let candidates: Vec<_> = entries
                .values()
                .map(|e| (e.descriptor.clone(), e.fetched_at))
                .collect();
            for victim in self.policy.entries_to_evict(&candidates, excess) {
                debug!("Evicting cached page at offset {}", victim.offset);
                entries.remove(&victim);
            }
        }
        entries.insert(descriptor, entry.clone());

        entry
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Clear the cache
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
