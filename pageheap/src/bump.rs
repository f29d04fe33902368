//! A block chained bump allocator.
//!
//! Objects are carved out of fixed size blocks taken from a [`RawMemory`]
//! source and are never freed one by one. When the current block cannot fit
//! a request a new block is chained on; the tail of the old block is
//! abandoned. Everything is returned to the source when the arena drops.

use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::fmt;
use core::ptr::NonNull;

use std::sync::Arc;

use crate::error::AllocError;
use crate::raw::{RawMemory, SystemMemory};
use crate::units::HumanSize;

struct RawBlock {
    base: NonNull<u8>,
    size: usize,
}

/// Bump allocation for values that live as long as the arena.
///
/// Destructors of allocated values never run.
///
/// ```
/// use pageheap::{BumpArena, KB};
///
/// let bump = BumpArena::new(4 * KB).unwrap();
/// let a = bump.alloc(1_u64).unwrap();
/// let name = bump.alloc_str("pageheap").unwrap();
/// *a += 1;
/// assert_eq!((*a, &*name), (2, "pageheap"));
/// ```
pub struct BumpArena {
    blocks: RefCell<Vec<RawBlock>>,
    // offset of the next free byte in the last block
    free: Cell<usize>,
    allocated: Cell<usize>,
    block_size: usize,
    raw: Arc<dyn RawMemory>,
}

// SAFETY: the blocks are owned by the arena, and values handed out borrow it.
unsafe impl Send for BumpArena {}

impl BumpArena {
    /// An arena chaining blocks of `block_size` bytes from the system
    /// allocator. The first block is allocated up front.
    pub fn new(block_size: usize) -> Result<Self, AllocError> {
        Self::with_source(block_size, Arc::new(SystemMemory))
    }

    pub fn with_source(block_size: usize, raw: Arc<dyn RawMemory>) -> Result<Self, AllocError> {
        if block_size == 0 {
            return Err(AllocError::ArenaTooSmall { size: 0 });
        }
        let arena = Self {
            blocks: RefCell::new(Vec::with_capacity(16)),
            free: Cell::new(0),
            allocated: Cell::new(0),
            block_size,
            raw,
        };
        arena.chain_block(block_size)?;
        Ok(arena)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks taken from the source.
    pub fn block_count(&self) -> usize {
        self.blocks.borrow().len()
    }

    /// Bytes handed out, not counting alignment padding.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.get()
    }

    fn chain_block(&self, size: usize) -> Result<(), AllocError> {
        let base = self
            .raw
            .allocate(size)
            .ok_or(AllocError::SourceExhausted { size })?;
        let mut blocks = self.blocks.borrow_mut();
        blocks.push(RawBlock { base, size });
        self.free.set(0);
        tracing::debug!(size = %HumanSize(size), blocks = blocks.len(), "chained bump block");
        Ok(())
    }

    fn bump(&self, layout: Layout) -> Option<NonNull<u8>> {
        let blocks = self.blocks.borrow();
        let block = blocks.last()?;
        let free = self.free.get();
        let addr = (block.base.as_ptr() as usize).checked_add(free)?;
        let padding = addr.wrapping_neg() & (layout.align() - 1);
        let start = free.checked_add(padding)?;
        let end = start.checked_add(layout.size())?;
        if end > block.size {
            return None;
        }
        self.free.set(end);
        self.allocated.set(self.allocated.get() + layout.size());
        // SAFETY: `start <= end <= size`, inside the block.
        Some(unsafe { block.base.add(start) })
    }

    /// Uninitialised memory for `layout`.
    pub fn alloc_layout(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if let Some(ptr) = self.bump(layout) {
            return Ok(ptr);
        }
        // room for the worst case padding, so the request fits a fresh block
        let needed = layout
            .size()
            .checked_add(layout.align())
            .ok_or(AllocError::SourceExhausted { size: usize::MAX })?;
        let size = self.block_size.max(needed);
        self.chain_block(size)?;
        self.bump(layout).ok_or(AllocError::SourceExhausted { size })
    }

    /// Move `value` into the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc<T>(&self, value: T) -> Result<&mut T, AllocError> {
        let ptr = self.alloc_layout(Layout::new::<T>())?.cast::<T>();
        // SAFETY: fresh memory sized and aligned for `T`, handed out once.
        unsafe {
            ptr.write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Copy `values` into the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_copy<T: Copy>(&self, values: &[T]) -> Result<&mut [T], AllocError> {
        let layout = Layout::for_value(values);
        let ptr = self.alloc_layout(layout)?.cast::<T>();
        // SAFETY: fresh memory for `values.len()` elements, handed out once.
        unsafe {
            ptr.as_ptr()
                .copy_from_nonoverlapping(values.as_ptr(), values.len());
            Ok(core::slice::from_raw_parts_mut(ptr.as_ptr(), values.len()))
        }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn alloc_str(&self, value: &str) -> Result<&mut str, AllocError> {
        let bytes = self.alloc_slice_copy(value.as_bytes())?;
        // SAFETY: copied from a valid `str`.
        Ok(unsafe { core::str::from_utf8_unchecked_mut(bytes) })
    }

    /// Return every block to the source.
    pub fn free(self) {
        drop(self);
    }
}

impl fmt::Debug for BumpArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BumpArena")
            .field("block_size", &self.block_size)
            .field("blocks", &self.block_count())
            .field("allocated", &self.allocated.get())
            .finish_non_exhaustive()
    }
}

impl Drop for BumpArena {
    fn drop(&mut self) {
        for block in self.blocks.get_mut().drain(..) {
            // SAFETY: each block came from this source with this size.
            unsafe { self.raw.free(block.base, block.size) };
        }
    }
}
