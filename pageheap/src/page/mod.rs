//! The page arena.
//!
//! design: one backing buffer is carved into base pages addressed by index.
//! Freed runs are threaded onto two intrusive lists whose links live in the
//! freed pages themselves: single pages on one list, multi page ("combined")
//! runs on the other. Requests the lists cannot satisfy are bump allocated
//! from `empty_page_index`.
//!
//! The arena does no locking of its own. Concurrent callers go through a
//! [`ThreadLocalCache`](crate::ThreadLocalCache), which owns the lock.

use core::fmt;
use core::ptr::NonNull;

use std::sync::Arc;

#[cfg(feature = "assertions")]
use hashbrown::HashSet;
#[cfg(feature = "assertions")]
use rustc_hash::FxBuildHasher;

use crate::error::AllocError;
use crate::raw::RawMemory;
use crate::units::{BASE_PAGE_SHIFT, BASE_PAGE_SIZE, HumanSize, pages_to_bytes};

mod handle;

pub use handle::{MAX_PAGES, PageHandle};


/// Bookkeeping for the page arena.
///
/// Invariants: `empty_page_index <= max_page_index + 1`, and
/// `allocated_pages` equals the sum of the page counts of all live handles.
#[derive(Debug, Clone, Copy)]
struct ArenaHeader {
    // head of the single base page free list
    free_single: PageHandle,
    // head of the combined run free list
    free_combined: PageHandle,
    // next page that has never been handed out
    empty_page_index: usize,
    max_page_index: usize,
    allocated_pages: usize,
}

/// Link written over the first bytes of a freed run.
///
/// Single pages only use `next`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct FreeNode {
    page_count: u64,
    next: PageHandle,
}

/// Translates between page handles and addresses.
///
/// Copyable and lock free: the buffer never moves while the arena lives.
#[derive(Debug, Clone, Copy)]
pub struct PageGeometry {
    base: NonNull<u8>,
    max_page_index: usize,
}

// SAFETY: the geometry only computes addresses, it never dereferences.
unsafe impl Send for PageGeometry {}
unsafe impl Sync for PageGeometry {}

impl PageGeometry {
    pub fn max_page_index(&self) -> usize {
        self.max_page_index
    }

    /// Address of the first byte of `handle`'s run.
    pub fn address_of(&self, handle: PageHandle) -> NonNull<u8> {
        // always checked, the result is dereferenced by safe callers
        assert!(
            !handle.is_null()
                && handle.page_index() + handle.page_count() <= self.max_page_index + 1,
            "{handle:?} lies outside an arena of {} pages",
            self.max_page_index
        );
        // SAFETY: checked in bounds above, index 1 is the first byte of the buffer.
        unsafe { self.base.add((handle.page_index() - 1) << BASE_PAGE_SHIFT) }
    }

    /// Page index of the page starting at `ptr`.
    pub fn address_to_page_index(&self, ptr: NonNull<u8>) -> usize {
        let start = self.base.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        invariant!(
            addr >= start && addr < start + pages_to_bytes(self.max_page_index),
            "address {ptr:p} is outside of the arena"
        );
        invariant!(
            (addr - start) % BASE_PAGE_SIZE == 0,
            "address {ptr:p} is not the start of a page"
        );
        ((addr - start) >> BASE_PAGE_SHIFT) + 1
    }

    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let start = self.base.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        addr >= start && addr < start + pages_to_bytes(self.max_page_index)
    }
}

/// A snapshot of arena utilisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    pub total_pages: usize,
    pub allocated_pages: usize,
    pub empty_page_index: usize,
    pub free_single_pages: usize,
    pub free_combined_runs: usize,
    pub free_combined_pages: usize,
}

impl ArenaStats {
    pub fn total_bytes(&self) -> usize {
        pages_to_bytes(self.total_pages)
    }

    pub fn allocated_bytes(&self) -> usize {
        pages_to_bytes(self.allocated_pages)
    }
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let percent = if self.total_pages == 0 {
            0.0
        } else {
            self.allocated_pages as f64 * 100.0 / self.total_pages as f64
        };
        write!(
            f,
            "used {} of {} ({percent:.1}%), bumped {} of {} pages, \
             {} free single pages, {} free combined runs ({} pages)",
            HumanSize(self.allocated_bytes()),
            HumanSize(self.total_bytes()),
            self.empty_page_index - 1,
            self.total_pages,
            self.free_single_pages,
            self.free_combined_runs,
            self.free_combined_pages,
        )
    }
}

/// Owns the backing buffer and serves page runs by handle.
pub struct PageArena {
    header: ArenaHeader,
    geometry: PageGeometry,
    buffer_size: usize,
    source: Arc<dyn RawMemory>,
    // live handles, used to catch double frees
    #[cfg(feature = "assertions")]
    live: HashSet<PageHandle, FxBuildHasher>,
}

// SAFETY: the buffer is owned exclusively by the arena.
unsafe impl Send for PageArena {}

impl PageArena {
    /// Create an arena over `total_size` bytes taken from `source`.
    ///
    /// The size is rounded down to whole base pages.
    pub fn new(total_size: usize, source: Arc<dyn RawMemory>) -> Result<Self, AllocError> {
        let max_page_index = (total_size >> BASE_PAGE_SHIFT).min(MAX_PAGES - 1);
        if max_page_index == 0 {
            return Err(AllocError::ArenaTooSmall { size: total_size });
        }
        let buffer_size = pages_to_bytes(max_page_index);
        let base = source
            .allocate(buffer_size)
            .ok_or(AllocError::SourceExhausted { size: buffer_size })?;

        tracing::debug!(
            size = %HumanSize(buffer_size),
            pages = max_page_index,
            "created page arena"
        );

        Ok(Self {
            header: ArenaHeader {
                free_single: PageHandle::NULL,
                free_combined: PageHandle::NULL,
                // page zero is the null handle
                empty_page_index: 1,
                max_page_index,
                allocated_pages: 0,
            },
            geometry: PageGeometry {
                base,
                max_page_index,
            },
            buffer_size,
            source,
            #[cfg(feature = "assertions")]
            live: HashSet::default(),
        })
    }

    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    pub fn source(&self) -> &Arc<dyn RawMemory> {
        &self.source
    }

    pub fn allocated_pages(&self) -> usize {
        self.header.allocated_pages
    }

    pub fn max_page_index(&self) -> usize {
        self.header.max_page_index
    }

    pub fn empty_page_index(&self) -> usize {
        self.header.empty_page_index
    }

    pub fn address_of(&self, handle: PageHandle) -> NonNull<u8> {
        self.geometry.address_of(handle)
    }

    pub fn address_to_page_index(&self, ptr: NonNull<u8>) -> usize {
        self.geometry.address_to_page_index(ptr)
    }

    /// Allocate a run of at least `page_count` base pages.
    ///
    /// Single pages come from the single page list. Larger requests take the
    /// first combined run that is big enough, handing out the whole run even
    /// if it is larger than asked for. Everything else is bump allocated.
    pub fn alloc(&mut self, page_count: usize) -> Result<PageHandle, AllocError> {
        invariant!(page_count != 0, "allocation of zero pages");

        let handle = if page_count == 1 {
            self.pop_single()
        } else {
            self.take_combined(page_count)
        };
        let handle = match handle {
            Some(handle) => handle,
            None => self.bump(page_count)?,
        };

        self.header.allocated_pages += handle.page_count();
        #[cfg(feature = "assertions")]
        self.live.insert(handle);
        Ok(handle)
    }

    /// Return a run to the free lists.
    ///
    /// # Safety
    ///
    /// `handle` must have been returned by [`PageArena::alloc`] on this arena
    /// and not freed since. No reference into the run may be used afterwards.
    pub unsafe fn free(&mut self, handle: PageHandle) {
        invariant!(!handle.is_null(), "free of the null page handle");
        invariant!(handle.page_count() != 0, "free of a zero page run");
        #[cfg(feature = "assertions")]
        {
            let was_live = self.live.remove(&handle);
            invariant!(was_live, "double free of {handle:?}");
        }

        let page = self.geometry.address_of(handle);
        if crate::assert::ENABLED {
            // SAFETY: the run is owned by the arena again.
            unsafe { self.source.zero(page, handle.byte_size()) };
        }

        let node = page.cast::<FreeNode>();
        if handle.page_count() == 1 {
            // SAFETY: a page is larger than a node and 256 byte aligned.
            unsafe {
                node.write(FreeNode {
                    page_count: 1,
                    next: self.header.free_single,
                })
            };
            self.header.free_single = handle;
        } else {
            // SAFETY: as above.
            unsafe {
                node.write(FreeNode {
                    page_count: handle.page_count() as u64,
                    next: self.header.free_combined,
                })
            };
            self.header.free_combined = handle;
        }
        tracing::trace!(?handle, "page run freed");
        self.header.allocated_pages -= handle.page_count();
    }

    fn node(&self, handle: PageHandle) -> FreeNode {
        // SAFETY: every handle on a free list had its node written by `free`.
        unsafe { self.geometry.address_of(handle).cast::<FreeNode>().read() }
    }

    fn set_next(&mut self, handle: PageHandle, next: PageHandle) {
        let node = self.geometry.address_of(handle).cast::<FreeNode>();
        // SAFETY: see `node`.
        unsafe { (*node.as_ptr()).next = next };
    }

    fn pop_single(&mut self) -> Option<PageHandle> {
        let head = self.header.free_single;
        if head.is_null() {
            return None;
        }
        self.header.free_single = self.node(head).next;
        tracing::debug!(?head, "reused single page");
        Some(head)
    }

    fn take_combined(&mut self, page_count: usize) -> Option<PageHandle> {
        let mut previous = PageHandle::NULL;
        let mut current = self.header.free_combined;
        while !current.is_null() {
            let node = self.node(current);
            invariant!(
                node.page_count as usize == current.page_count(),
                "corrupted free list node at {current:?}"
            );
            if current.page_count() >= page_count {
                if previous.is_null() {
                    self.header.free_combined = node.next;
                } else {
                    self.set_next(previous, node.next);
                }
                tracing::debug!(requested = page_count, run = ?current, "reused combined run");
                return Some(current);
            }
            previous = current;
            current = node.next;
        }
        None
    }

    fn bump(&mut self, page_count: usize) -> Result<PageHandle, AllocError> {
        let start = self.header.empty_page_index;
        let end = start.saturating_add(page_count);
        if page_count > MAX_PAGES || end > self.header.max_page_index + 1 {
            return Err(self.out_of_memory(page_count));
        }
        self.header.empty_page_index = end;
        let handle = PageHandle::from_parts(page_count, start);
        tracing::debug!(?handle, "bumped new run");
        Ok(handle)
    }

    /// The error reported when `page_count` pages cannot be served.
    pub fn out_of_memory(&self, page_count: usize) -> AllocError {
        let stats = self.stats();
        tracing::warn!(requested = page_count, %stats, "page arena out of memory");
        AllocError::OutOfMemory {
            requested_pages: page_count,
            stats,
        }
    }

    pub fn free_single_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.header.free_single;
        while !current.is_null() {
            count += 1;
            current = self.node(current).next;
        }
        count
    }

    /// Number of combined runs on the free list and their total page count.
    pub fn free_combined_count(&self) -> (usize, usize) {
        let (mut runs, mut pages) = (0, 0);
        let mut current = self.header.free_combined;
        while !current.is_null() {
            let node = self.node(current);
            runs += 1;
            pages += node.page_count as usize;
            current = node.next;
        }
        (runs, pages)
    }

    pub fn stats(&self) -> ArenaStats {
        let (free_combined_runs, free_combined_pages) = self.free_combined_count();
        ArenaStats {
            total_pages: self.header.max_page_index,
            allocated_pages: self.header.allocated_pages,
            empty_page_index: self.header.empty_page_index,
            free_single_pages: self.free_single_count(),
            free_combined_runs,
            free_combined_pages,
        }
    }
}

impl fmt::Debug for PageArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageArena")
            .field("header", &self.header)
            .field("base", &self.geometry.base)
            .finish_non_exhaustive()
    }
}

impl Drop for PageArena {
    fn drop(&mut self) {
        // SAFETY: the buffer came from this source with this size.
        unsafe { self.source.free(self.geometry.base, self.buffer_size) };
    }
}
