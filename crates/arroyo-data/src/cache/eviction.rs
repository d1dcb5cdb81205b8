//! Eviction policies for the result cache

use arroyo_core::QueryDescriptor;
use tokio::time::Instant;

/// Chooses which cached pages to drop when the cache is over capacity
pub trait EvictionPolicy: Send + Sync {
    /// Pick `count` victims from `(descriptor, fetched_at)` pairs
    fn entries_to_evict(&self, entries: &[(QueryDescriptor, Instant)], count: usize) -> Vec<QueryDescriptor>;
}

/// Drops the pages that were fetched longest ago
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastRecentlyFetched;

impl EvictionPolicy for LeastRecentlyFetched {
    fn entries_to_evict(&self, entries: &[(QueryDescriptor, Instant)], count: usize) -> Vec<QueryDescriptor> {
        // Sort by fetch time (oldest first)
        let mut sorted: Vec<_> = entries.iter().collect();
        sorted.sort_by_key(|(_, fetched_at)| *fetched_at);

        sorted
            .into_iter()
            .take(count)
            .map(|(descriptor, _)| descriptor.clone())
            .collect()
    }
}
