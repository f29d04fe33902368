//! The arena front door.

use core::fmt::{self, Write as _};
use core::panic::Location;
use core::ptr::NonNull;

use std::sync::Arc;

use crate::cache::ThreadLocalCache;
use crate::config::ArenaConfig;
use crate::error::AllocError;
use crate::page::{ArenaStats, PageArena, PageGeometry, PageHandle};
use crate::raw::{RawMemory, SystemMemory};
use crate::sync::SpinLock;
use crate::trace::{LeakTracer, TraceKind, TraceRecord};
use crate::worker::CacheRegistry;

/// A page arena shared by every worker thread.
///
/// Allocation goes through the calling worker's [`ThreadLocalCache`], so the
/// arena lock is only taken on cache misses. Containers borrow the arena and
/// cannot outlive it.
///
/// ```
/// use pageheap::{Arena, MB, TraceKind};
///
/// let arena = Arena::new(MB).unwrap();
/// let pages = arena.alloc_pages(2, TraceKind::Raw).unwrap();
/// assert!(arena.is_leaking());
/// unsafe { arena.free_pages(pages, TraceKind::Raw) };
/// assert!(!arena.is_leaking());
/// ```
pub struct Arena {
    pages: Arc<SpinLock<PageArena>>,
    geometry: PageGeometry,
    caches: CacheRegistry,
    tracer: LeakTracer,
    config: ArenaConfig,
    raw: Arc<dyn RawMemory>,
}

impl Arena {
    /// An arena of `total_size` bytes with the default configuration.
    pub fn new(total_size: usize) -> Result<Self, AllocError> {
        Self::with_config(ArenaConfig::new(total_size))
    }

    pub fn with_config(config: ArenaConfig) -> Result<Self, AllocError> {
        Self::with_source(config, Arc::new(SystemMemory))
    }

    /// An arena whose backing buffer comes from `raw`.
    pub fn with_source(config: ArenaConfig, raw: Arc<dyn RawMemory>) -> Result<Self, AllocError> {
        let arena = PageArena::new(config.total_size, Arc::clone(&raw))?;
        let geometry = arena.geometry();
        let pages = Arc::new(SpinLock::new(arena));
        let caches = CacheRegistry::new(Arc::clone(&pages), config);
        Ok(Self {
            pages,
            geometry,
            caches,
            tracer: LeakTracer::new(),
            config,
            raw,
        })
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// The raw memory source backing the arena.
    pub fn raw(&self) -> &dyn RawMemory {
        &*self.raw
    }

    pub fn tracer(&self) -> &LeakTracer {
        &self.tracer
    }

    /// Allocate a run of at least `page_count` base pages.
    ///
    /// The caller's location is recorded for leak reports.
    #[track_caller]
    pub fn alloc_pages(&self, page_count: usize, kind: TraceKind) -> Result<PageHandle, AllocError> {
        let location = Location::caller();
        let handle = self.caches.with_current(|cache| cache.alloc(page_count))?;
        self.tracer.record(
            self.address_of(handle),
            TraceRecord {
                page_index: handle.page_index(),
                location,
                size: handle.byte_size(),
                kind,
            },
        );
        Ok(handle)
    }

    /// Give a run back.
    ///
    /// # Safety
    ///
    /// `handle` must come from [`Arena::alloc_pages`] on this arena with the
    /// same `kind`, and neither the handle nor any pointer into the run may
    /// be used afterwards.
    pub unsafe fn free_pages(&self, handle: PageHandle, kind: TraceKind) {
        invariant!(!handle.is_null(), "free of the null page handle");
        self.tracer.remove(self.address_of(handle), kind);
        // SAFETY: forwarded from the caller.
        self.caches.with_current(|cache| unsafe { cache.free(handle) });
    }

    /// Address of the first byte of `handle`'s run.
    pub fn address_of(&self, handle: PageHandle) -> NonNull<u8> {
        self.geometry.address_of(handle)
    }

    /// Page index of the page starting at `ptr`.
    pub fn address_to_page_index(&self, ptr: NonNull<u8>) -> usize {
        self.geometry.address_to_page_index(ptr)
    }

    /// A fresh cache in front of this arena.
    ///
    /// Allocations made through it bypass the leak tracer, and its pooled
    /// pages count as in use until it is dropped or flushed.
    pub fn local_cache(&self) -> ThreadLocalCache {
        ThreadLocalCache::new(Arc::clone(&self.pages), &self.config)
    }

    /// Return every page parked in the worker caches to the arena.
    pub fn flush_caches(&self) {
        self.caches.flush_all();
    }

    pub fn stats(&self) -> ArenaStats {
        self.pages.lock().stats()
    }

    /// Base pages held by callers, not counting pages parked in caches.
    pub fn pages_in_use(&self) -> usize {
        // caches first, the slot locks must not be taken under the arena lock
        let cached = self.caches.cached_pages();
        let allocated = self.pages.lock().allocated_pages();
        allocated.saturating_sub(cached)
    }

    /// Whether any page is still held by a caller.
    pub fn is_leaking(&self) -> bool {
        self.pages_in_use() != 0 || self.tracer.has_leak()
    }

    /// Arena utilisation followed by every traced live allocation.
    pub fn leak_report(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(
            report,
            "{} pages in use; {}",
            self.pages_in_use(),
            self.stats()
        );
        report.push_str(&self.tracer.leak_report());
        report
    }

    /// Tear the arena down, returning its buffer to the raw source.
    pub fn free(self) {
        drop(self);
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("stats", &self.stats())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.caches.destroy();
        if self.is_leaking() {
            tracing::warn!(report = %self.leak_report(), "arena dropped with live allocations");
        } else {
            tracing::debug!("arena dropped");
        }
    }
}
