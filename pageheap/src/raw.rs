//! The raw memory source backing an arena.

use core::ptr::NonNull;

use std::alloc::{Layout, alloc_zeroed, dealloc};

use crate::units::BASE_PAGE_SIZE;

/// A source of raw, zero filled memory.
///
/// The arena asks for exactly one region at construction and returns it at
/// teardown. The provided helpers are the block operations containers use on
/// page payloads.
pub trait RawMemory: Send + Sync {
    /// Allocate `size` zeroed bytes aligned to [`BASE_PAGE_SIZE`].
    ///
    /// Returns `None` if the request cannot be satisfied.
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Release a region obtained from [`RawMemory::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this source with the same `size`,
    /// and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);

    /// # Safety
    ///
    /// `ptr` must be valid for `size` bytes of writes.
    unsafe fn zero(&self, ptr: NonNull<u8>, size: usize) {
        unsafe { ptr.as_ptr().write_bytes(0, size) }
    }

    /// Copy `size` bytes from `src` to `dst`. The regions may overlap.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads and `dst` for writes of `size` bytes.
    unsafe fn copy(&self, dst: NonNull<u8>, src: NonNull<u8>, size: usize) {
        unsafe { core::ptr::copy(src.as_ptr(), dst.as_ptr(), size) }
    }

    /// # Safety
    ///
    /// Both pointers must be valid for reads of `size` bytes.
    unsafe fn compare(&self, a: NonNull<u8>, b: NonNull<u8>, size: usize) -> bool {
        unsafe {
            core::slice::from_raw_parts(a.as_ptr(), size)
                == core::slice::from_raw_parts(b.as_ptr(), size)
        }
    }
}

/// [`RawMemory`] backed by the global Rust allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl SystemMemory {
    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size, BASE_PAGE_SIZE).ok()
    }
}

impl RawMemory for SystemMemory {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Self::layout(size)?;
        // SAFETY: layout has a non-zero size.
        NonNull::new(unsafe { alloc_zeroed(layout) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        let Some(layout) = Self::layout(size) else {
            return;
        };
        unsafe { dealloc(ptr.as_ptr(), layout) }
    }
}
