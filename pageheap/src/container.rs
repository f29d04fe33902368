//! Layout shared by page backed containers: a header at page offset 0 and
//! the payload right after it, aligned for the element type.

use core::ptr::NonNull;

use crate::error::AllocError;
use crate::memory::Arena;
use crate::page::{MAX_PAGES, PageHandle};
use crate::trace::TraceKind;
use crate::units::{BASE_PAGE_SIZE, pages_for};

/// Rejects element types the page layout cannot hold.
pub(crate) const fn assert_element<T>() {
    const {
        assert!(size_of::<T>() != 0, "zero sized elements are not supported");
        assert!(
            align_of::<T>() <= BASE_PAGE_SIZE,
            "element alignment exceeds the page size"
        );
    }
}

/// Byte offset of the payload behind a header `H`.
pub(crate) const fn payload_offset<H, T>() -> usize {
    let align = align_of::<T>();
    (size_of::<H>() + align - 1) & !(align - 1)
}

/// A freshly allocated header and payload.
pub(crate) struct Block<H, T> {
    pub handle: PageHandle,
    pub header: NonNull<H>,
    pub payload: NonNull<T>,
    /// Elements that fit behind the header. The run may be larger than
    /// requested, so this can exceed the requested count.
    pub capacity: usize,
}

/// Allocate room for a header `H` followed by `count` elements of `T`.
///
/// Neither the header nor the payload is initialised.
#[track_caller]
pub(crate) fn allocate<H, T>(
    arena: &Arena,
    count: usize,
    kind: TraceKind,
) -> Result<Block<H, T>, AllocError> {
    assert_element::<T>();
    let offset = payload_offset::<H, T>();
    let pages = count
        .checked_mul(size_of::<T>())
        .and_then(|bytes| bytes.checked_add(offset))
        .map_or(MAX_PAGES + 1, pages_for);

    let handle = arena.alloc_pages(pages, kind)?;
    let base = arena.address_of(handle);
    // SAFETY: the run holds at least `offset` bytes, pages are aligned to
    // `BASE_PAGE_SIZE` which is at least the header and element alignment.
    let payload = unsafe { base.add(offset) }.cast::<T>();
    Ok(Block {
        handle,
        header: base.cast::<H>(),
        payload,
        capacity: (handle.byte_size() - offset) / size_of::<T>(),
    })
}

/// Return a container's pages.
///
/// # Safety
///
/// `handle` must come from [`allocate`] with the same `kind`, and the
/// header and payload must not be used afterwards.
pub(crate) unsafe fn release(arena: &Arena, handle: PageHandle, kind: TraceKind) {
    // SAFETY: forwarded from the caller.
    unsafe { arena.free_pages(handle, kind) };
}
