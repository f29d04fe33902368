//! Per worker page caches in front of the shared arena.

use std::sync::Arc;

use crate::config::ArenaConfig;
use crate::error::AllocError;
use crate::page::{PageArena, PageGeometry, PageHandle};
use crate::raw::RawMemory;
use crate::sync::SpinLock;


/// A bounded pool of page runs owned by one worker.
///
/// Requests are served from the pool without locking. A miss takes the arena
/// lock once and fetches several runs of the requested size, so the next
/// few requests of that size are served locally again.
///
/// Dropping the cache returns every pooled run to the arena.
pub struct ThreadLocalCache {
    arena: Arc<SpinLock<PageArena>>,
    // for zeroing freed runs without the arena lock
    geometry: PageGeometry,
    source: Arc<dyn RawMemory>,
    pages: Vec<PageHandle>,
    capacity: usize,
    batch_count: usize,
    large_page_threshold: usize,
    destroyed: bool,
}

impl ThreadLocalCache {
    pub fn new(arena: Arc<SpinLock<PageArena>>, config: &ArenaConfig) -> Self {
        let (geometry, source) = {
            let pages = arena.lock();
            (pages.geometry(), Arc::clone(pages.source()))
        };
        Self {
            arena,
            geometry,
            source,
            pages: Vec::with_capacity(config.cache_capacity),
            capacity: config.cache_capacity,
            batch_count: config.batch_count,
            large_page_threshold: config.large_page_threshold,
            destroyed: false,
        }
    }

    /// A new empty cache in front of the same arena.
    pub fn sibling(&self) -> Self {
        Self {
            arena: Arc::clone(&self.arena),
            geometry: self.geometry,
            source: Arc::clone(&self.source),
            pages: Vec::with_capacity(self.capacity),
            capacity: self.capacity,
            batch_count: self.batch_count,
            large_page_threshold: self.large_page_threshold,
            destroyed: false,
        }
    }

    pub fn arena(&self) -> &Arc<SpinLock<PageArena>> {
        &self.arena
    }

    /// Number of runs in the pool.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total base pages parked in the pool.
    pub fn cached_pages(&self) -> usize {
        self.pages.iter().map(|page| page.page_count()).sum()
    }

    /// Allocate a run of at least `page_count` base pages.
    pub fn alloc(&mut self, page_count: usize) -> Result<PageHandle, AllocError> {
        invariant!(!self.destroyed, "use of a destroyed cache");
        invariant!(page_count != 0, "allocation of zero pages");

        if let Some(position) = self
            .pages
            .iter()
            .position(|page| page.page_count() >= page_count)
        {
            return Ok(self.pages.swap_remove(position));
        }

        // nothing in a full pool fits, it is all junk for this workload
        if self.pages.len() >= self.capacity {
            invariant!(
                self.pages.len() == self.capacity,
                "cache holds {} runs, capacity is {}",
                self.pages.len(),
                self.capacity
            );
            self.flush();
        }

        if page_count >= self.large_page_threshold {
            return self.arena.lock().alloc(page_count);
        }

        let mut fetched = 0;
        let mut fetched_pages = 0;
        let mut error = None;
        {
            let mut arena = self.arena.lock();
            while fetched < self.batch_count
                && fetched_pages < self.large_page_threshold
                && self.pages.len() < self.capacity
            {
                match arena.alloc(page_count) {
                    Ok(page) => {
                        self.pages.push(page);
                        fetched += 1;
                        fetched_pages += page_count;
                    }
                    Err(err) => {
                        error = Some(err);
                        break;
                    }
                }
            }
        }
        tracing::debug!(page_count, fetched, "refilled page cache");

        match (fetched, error) {
            (0, Some(err)) => Err(err),
            _ => {
                let page = self.pages.pop();
                invariant!(
                    page.is_some_and(|page| page.page_count() >= page_count),
                    "refill produced no usable run for {page_count} pages"
                );
                page.ok_or_else(|| self.arena.lock().out_of_memory(page_count))
            }
        }
    }

    /// Give a run back to the pool, or to the arena when it does not fit.
    ///
    /// With the `assertions` feature the run is zeroed before it is pooled.
    ///
    /// # Safety
    ///
    /// `handle` must come from an allocation on this cache's arena and must
    /// not be used or freed again.
    pub unsafe fn free(&mut self, handle: PageHandle) {
        invariant!(!self.destroyed, "use of a destroyed cache");
        invariant!(!handle.is_null(), "free of the null page handle");
        invariant!(
            !self.pages.contains(&handle),
            "double free of {handle:?} into a page cache"
        );
        if crate::assert::ENABLED {
            // SAFETY: the caller gave the run up.
            unsafe {
                self.source
                    .zero(self.geometry.address_of(handle), handle.byte_size())
            };
        }

        if handle.page_count() > self.large_page_threshold {
            // SAFETY: forwarded from the caller.
            unsafe { self.arena.lock().free(handle) };
            return;
        }

        if self.pages.len() >= self.capacity {
            let last = self.pages.len() - 1;
            let mut arena = self.arena.lock();
            // keep the larger run, it serves more requests
            if handle.page_count() < self.pages[last].page_count() {
                // SAFETY: forwarded from the caller.
                unsafe { arena.free(handle) };
            } else {
                let evicted = core::mem::replace(&mut self.pages[last], handle);
                // SAFETY: pooled runs are owned by the cache.
                unsafe { arena.free(evicted) };
            }
            return;
        }

        self.pages.push(handle);
    }

    /// Return every pooled run to the arena under one lock.
    pub fn flush(&mut self) {
        if self.pages.is_empty() {
            return;
        }
        let mut arena = self.arena.lock();
        tracing::debug!(runs = self.pages.len(), "flushing page cache");
        for page in self.pages.drain(..) {
            // SAFETY: pooled runs are owned by the cache.
            unsafe { arena.free(page) };
        }
    }

    /// Flush the pool and retire the cache.
    ///
    /// Any further use is a defect.
    pub fn destroy(&mut self) {
        invariant!(!self.destroyed, "double destroy of a page cache");
        self.flush();
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl core::fmt::Debug for ThreadLocalCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadLocalCache")
            .field("pages", &self.pages)
            .field("capacity", &self.capacity)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl Drop for ThreadLocalCache {
    fn drop(&mut self) {
        if !self.destroyed {
            self.flush();
        }
    }
}
