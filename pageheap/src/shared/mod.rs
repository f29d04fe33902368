//! Atomically reference counted values stored in arena pages.
//!
//! A [`SharedFactory`] packs values into holder pages. Each value carries
//! its own count, and each holder counts the values still alive in it plus
//! one vote for the factory while the factory is filling it. The holder page
//! is freed when that count drops to zero.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ops::Deref;
use core::ptr::{self, NonNull};
use core::sync::atomic::{self, AtomicUsize, Ordering};

use crate::container::{self, Block};
use crate::error::AllocError;
use crate::memory::Arena;
use crate::page::PageHandle;
use crate::trace::TraceKind;


#[repr(C)]
struct HolderHeader {
    // live values plus the factory's vote
    holders: AtomicUsize,
    // only touched by the factory
    len: usize,
    capacity: usize,
    handle: PageHandle,
}

#[repr(C)]
struct Slot<T> {
    ref_count: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Drop one vote on `holder`, freeing its page on the last one.
///
/// # Safety
///
/// The caller must own a vote on `holder` and not use it afterwards.
unsafe fn release_holder(arena: &Arena, holder: NonNull<HolderHeader>) {
    // SAFETY: the holder stays alive while the caller's vote is held.
    let holders = unsafe { &(*holder.as_ptr()).holders };
    if holders.fetch_sub(1, Ordering::Release) != 1 {
        return;
    }
    atomic::fence(Ordering::Acquire);
    // SAFETY: this was the last vote, nothing else refers to the page.
    unsafe {
        let handle = (*holder.as_ptr()).handle;
        tracing::trace!(?handle, "freeing shared holder");
        container::release(arena, handle, TraceKind::Shared);
    }
}

/// Creates [`SharedRef`]s, batching their storage into holder pages.
///
/// ```
/// use pageheap::{Arena, KB, SharedFactory};
///
/// let arena = Arena::new(64 * KB).unwrap();
/// let mut factory = SharedFactory::new(&arena);
/// let a = factory.make_shared(String::from("hello")).unwrap();
/// let b = a.share();
/// assert_eq!(b.ref_count(), 2);
/// a.free();
/// assert_eq!(*b, "hello");
/// ```
pub struct SharedFactory<'a, T> {
    arena: &'a Arena,
    holder: Option<NonNull<HolderHeader>>,
    _marker: PhantomData<T>,
}

// SAFETY: values leave the factory as `SharedRef`s, which need the same
// bounds to cross threads.
unsafe impl<T: Send + Sync> Send for SharedFactory<'_, T> {}

impl<'a, T> SharedFactory<'a, T> {
    pub const fn new(arena: &'a Arena) -> Self {
        Self {
            arena,
            holder: None,
            _marker: PhantomData,
        }
    }

    fn slot_at(holder: NonNull<HolderHeader>, index: usize) -> NonNull<Slot<T>> {
        let offset = container::payload_offset::<HolderHeader, Slot<T>>();
        // SAFETY: the slots start `offset` bytes into the holder page and the
        // caller passes an index below the capacity.
        unsafe {
            holder
                .cast::<u8>()
                .add(offset)
                .cast::<Slot<T>>()
                .add(index)
        }
    }

    #[track_caller]
    fn current_holder(&mut self) -> Result<NonNull<HolderHeader>, AllocError> {
        if let Some(holder) = self.holder {
            return Ok(holder);
        }
        let block: Block<HolderHeader, Slot<T>> =
            container::allocate(self.arena, 1, TraceKind::Shared)?;
        // SAFETY: the block header is in bounds and not shared yet.
        unsafe {
            block.header.write(HolderHeader {
                holders: AtomicUsize::new(1),
                len: 0,
                capacity: block.capacity,
                handle: block.handle,
            });
        }
        tracing::trace!(handle = ?block.handle, slots = block.capacity, "new shared holder");
        self.holder = Some(block.header);
        Ok(block.header)
    }

    /// Move `value` into a holder page and return its first reference.
    #[track_caller]
    pub fn make_shared(&mut self, value: T) -> Result<SharedRef<'a, T>, AllocError> {
        let holder = self.current_holder()?;
        let header = holder.as_ptr();
        // SAFETY: `len` and `capacity` are only accessed by the factory, the
        // slot at `len` is free.
        let (slot, full) = unsafe {
            let index = (*header).len;
            invariant!(index < (*header).capacity, "shared holder overflow");
            let slot = Self::slot_at(holder, index);
            slot.write(Slot {
                ref_count: AtomicUsize::new(1),
                value: UnsafeCell::new(MaybeUninit::new(value)),
            });
            (*header).len = index + 1;
            (*header).holders.fetch_add(1, Ordering::Relaxed);
            (slot, index + 1 == (*header).capacity)
        };

        if full {
            // the factory gives up its vote, the values keep the page alive
            self.holder = None;
            // SAFETY: the factory's vote is released exactly once.
            unsafe { release_holder(self.arena, holder) };
        }

        Ok(SharedRef {
            arena: self.arena,
            holder,
            slot,
            _marker: PhantomData,
        })
    }

    /// Release the factory's vote on its current holder.
    ///
    /// Dropping the factory does the same.
    pub fn destroy(&mut self) {
        if let Some(holder) = self.holder.take() {
            // SAFETY: the factory's vote is released exactly once.
            unsafe { release_holder(self.arena, holder) };
        }
    }
}

impl<T> Drop for SharedFactory<'_, T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T> fmt::Debug for SharedFactory<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFactory")
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

/// One owner of a value created by a [`SharedFactory`].
///
/// Cloning shares the value. The value is dropped with its last owner.
pub struct SharedRef<'a, T> {
    arena: &'a Arena,
    holder: NonNull<HolderHeader>,
    slot: NonNull<Slot<T>>,
    _marker: PhantomData<T>,
}

// SAFETY: the counts are atomic, the value is only ever shared immutably and
// dropped by whichever owner is last.
unsafe impl<T: Send + Sync> Send for SharedRef<'_, T> {}
unsafe impl<T: Send + Sync> Sync for SharedRef<'_, T> {}

impl<T> SharedRef<'_, T> {
    fn slot(&self) -> &Slot<T> {
        // SAFETY: this owner keeps the slot alive.
        unsafe { self.slot.as_ref() }
    }

    /// Another owner of the same value.
    pub fn share(&self) -> Self {
        let previous = self.slot().ref_count.fetch_add(1, Ordering::Relaxed);
        invariant!(previous != 0, "share of a released shared value");
        Self {
            arena: self.arena,
            holder: self.holder,
            slot: self.slot,
            _marker: PhantomData,
        }
    }

    /// Number of owners of the value.
    pub fn ref_count(&self) -> usize {
        self.slot().ref_count.load(Ordering::Acquire)
    }

    /// The holder page the value lives in.
    pub fn holder_handle(&self) -> PageHandle {
        // SAFETY: `handle` is written before the holder is shared and never
        // changes.
        unsafe { (*self.holder.as_ptr()).handle }
    }

    /// Give up this owner.
    pub fn free(self) {
        drop(self);
    }
}

impl<T> Clone for SharedRef<'_, T> {
    fn clone(&self) -> Self {
        self.share()
    }
}

impl<T> Deref for SharedRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the value is initialised while any owner is alive.
        unsafe { (*self.slot().value.get()).assume_init_ref() }
    }
}

impl<T> Drop for SharedRef<'_, T> {
    fn drop(&mut self) {
        let previous = self.slot().ref_count.fetch_sub(1, Ordering::Release);
        invariant!(previous != 0, "double free of a shared value");
        if previous != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);
        // SAFETY: this was the last owner of the value, and of the value's
        // vote on the holder.
        unsafe {
            ptr::drop_in_place((*self.slot().value.get()).as_mut_ptr());
            release_holder(self.arena, self.holder);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: fmt::Display> fmt::Display for SharedRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T: PartialEq> PartialEq for SharedRef<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}
