//! Arena configuration.

use std::num::NonZeroUsize;
use std::thread;

/// Default bound on the number of runs a [`ThreadLocalCache`](crate::ThreadLocalCache) keeps.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;
/// Default number of runs fetched from the arena per cache miss.
pub const DEFAULT_BATCH_COUNT: usize = 4;
/// Requests of at least this many base pages bypass the caches.
pub const DEFAULT_LARGE_PAGE_THRESHOLD: usize = 40960;

/// Settings for an [`Arena`](crate::Arena).
///
/// ```
/// use pageheap::{ArenaConfig, MB};
///
/// let config = ArenaConfig::new(16 * MB).with_cache_capacity(32).with_batch_count(2);
/// assert_eq!(config.total_size, 16 * MB);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Size of the backing buffer in bytes, rounded down to whole base pages.
    pub total_size: usize,
    /// Maximum number of runs held by one cache.
    pub cache_capacity: usize,
    /// Runs fetched from the arena under one lock on a cache miss.
    pub batch_count: usize,
    /// Page count at or above which requests go straight to the arena.
    pub large_page_threshold: usize,
    /// Number of per worker cache slots. Workers with higher ids share an
    /// overflow map.
    pub cache_slots: usize,
}

impl ArenaConfig {
    pub fn new(total_size: usize) -> Self {
        Self {
            total_size,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            batch_count: DEFAULT_BATCH_COUNT,
            large_page_threshold: DEFAULT_LARGE_PAGE_THRESHOLD,
            cache_slots: thread::available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }

    pub fn with_total_size(mut self, total_size: usize) -> Self {
        self.total_size = total_size;
        self
    }

    /// Clamped to at least one run.
    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity.max(1);
        self
    }

    /// Clamped to at least one batch.
    pub fn with_batch_count(mut self, batch_count: usize) -> Self {
        self.batch_count = batch_count.max(1);
        self
    }

    pub fn with_large_page_threshold(mut self, large_page_threshold: usize) -> Self {
        self.large_page_threshold = large_page_threshold.max(1);
        self
    }

    pub fn with_cache_slots(mut self, cache_slots: usize) -> Self {
        self.cache_slots = cache_slots;
        self
    }
}
