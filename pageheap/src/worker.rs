//! Worker identification and the per worker cache registry.
//!
//! Every thread that touches an arena is given a small integer id. Ids are
//! handed back when the thread exits, so a long running process keeps
//! hitting the fixed slots instead of growing the overflow map.

use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;

use crate::cache::ThreadLocalCache;
use crate::config::ArenaConfig;
use crate::page::PageArena;
use crate::sync::SpinLock;

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(0);
static RETIRED_WORKER_IDS: Mutex<Vec<usize>> = Mutex::new(Vec::new());

struct WorkerId {
    id: Cell<Option<usize>>,
}

impl WorkerId {
    fn get(&self) -> usize {
        if let Some(id) = self.id.get() {
            return id;
        }
        let id = RETIRED_WORKER_IDS
            .lock()
            .pop()
            .unwrap_or_else(|| NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed));
        self.id.set(Some(id));
        id
    }
}

impl Drop for WorkerId {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            RETIRED_WORKER_IDS.lock().push(id);
        }
    }
}

thread_local! {
    static WORKER_ID: WorkerId = const { WorkerId { id: Cell::new(None) } };
}

/// The id of the calling thread, unique among live threads.
///
/// During thread teardown, once the id has been released, a fresh id that is
/// never recycled is returned instead.
pub fn current_worker_id() -> usize {
    WORKER_ID
        .try_with(WorkerId::get)
        .unwrap_or_else(|_| NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
}

/// One [`ThreadLocalCache`] per worker.
///
/// Workers below `cache_slots` own a fixed slot. The slot mutex is only
/// contended if an id is recycled while its previous owner is still inside
/// an operation, so locking it costs one uncontended atomic. Higher ids share
/// an overflow map.
pub struct CacheRegistry {
    slots: Box<[Mutex<ThreadLocalCache>]>,
    overflow: Mutex<HashMap<usize, ThreadLocalCache, FxBuildHasher>>,
    arena: Arc<SpinLock<PageArena>>,
    config: ArenaConfig,
}

impl CacheRegistry {
    pub fn new(arena: Arc<SpinLock<PageArena>>, config: ArenaConfig) -> Self {
        let slots = (0..config.cache_slots)
            .map(|_| Mutex::new(ThreadLocalCache::new(Arc::clone(&arena), &config)))
            .collect();
        Self {
            slots,
            overflow: Mutex::new(HashMap::default()),
            arena,
            config,
        }
    }

    /// Run `f` with the calling worker's cache.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut ThreadLocalCache) -> R) -> R {
        let id = current_worker_id();
        if let Some(slot) = self.slots.get(id) {
            return f(&mut *slot.lock());
        }
        let mut overflow = self.overflow.lock();
        let cache = overflow.entry(id).or_insert_with(|| {
            tracing::debug!(worker = id, "created overflow page cache");
            ThreadLocalCache::new(Arc::clone(&self.arena), &self.config)
        });
        f(cache)
    }

    /// Base pages parked across every cache.
    pub fn cached_pages(&self) -> usize {
        let fixed: usize = self.slots.iter().map(|slot| slot.lock().cached_pages()).sum();
        let overflow: usize = self
            .overflow
            .lock()
            .values()
            .map(ThreadLocalCache::cached_pages)
            .sum();
        fixed + overflow
    }

    /// Return every pooled run to the arena. Overflow caches are dropped.
    pub fn flush_all(&self) {
        for slot in &self.slots {
            slot.lock().flush();
        }
        self.overflow.lock().clear();
    }

    /// Flush and retire every cache.
    pub fn destroy(&mut self) {
        for slot in &mut self.slots {
            slot.get_mut().destroy();
        }
        for (_, mut cache) in self.overflow.get_mut().drain() {
            cache.destroy();
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow.lock().len()
    }
}
