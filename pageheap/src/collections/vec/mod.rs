//! A growable array stored in arena pages.

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};
use core::slice;

use crate::container::{self, Block};
use crate::error::AllocError;
use crate::memory::Arena;
use crate::page::PageHandle;
use crate::trace::TraceKind;

#[cfg(test)]
mod tests;

// elements reserved by the first allocation of a null vec, at least
const MIN_NON_NULL_CAPACITY: usize = 8;

#[repr(C)]
struct VecHeader {
    len: usize,
    capacity: usize,
    handle: PageHandle,
    elements: NonNull<u8>,
}

/// A growable array whose header and elements share one page run.
///
/// Growth allocates a larger run, moves the elements over and frees the old
/// run. Dropping the vec drops its elements and frees its pages.
///
/// ```
/// use pageheap::{Arena, KB, PageVec};
///
/// let arena = Arena::new(64 * KB).unwrap();
/// let mut vec = PageVec::new(&arena);
/// vec.push(1).unwrap();
/// vec.extend_from_slice(&[2, 3]).unwrap();
/// assert_eq!(vec.as_slice(), &[1, 2, 3]);
/// ```
pub struct PageVec<'a, T> {
    arena: &'a Arena,
    header: Option<NonNull<VecHeader>>,
    _marker: PhantomData<T>,
}

// SAFETY: the vec owns its elements, pages may be freed from any thread.
unsafe impl<T: Send> Send for PageVec<'_, T> {}
unsafe impl<T: Sync> Sync for PageVec<'_, T> {}

impl<'a, T> PageVec<'a, T> {
    /// A null vec. Nothing is allocated until the first element is added.
    pub const fn new(arena: &'a Arena) -> Self {
        Self {
            arena,
            header: None,
            _marker: PhantomData,
        }
    }

    #[track_caller]
    pub fn with_capacity(arena: &'a Arena, capacity: usize) -> Result<Self, AllocError> {
        let mut vec = Self::new(arena);
        if capacity != 0 {
            vec.reallocate(capacity)?;
        }
        Ok(vec)
    }

    #[track_caller]
    pub fn from_slice(arena: &'a Arena, values: &[T]) -> Result<Self, AllocError>
    where
        T: Clone,
    {
        let mut vec = Self::with_capacity(arena, values.len())?;
        vec.extend_from_slice(values)?;
        Ok(vec)
    }

    /// A vec of `len` default values.
    #[track_caller]
    pub fn with_len(arena: &'a Arena, len: usize) -> Result<Self, AllocError>
    where
        T: Copy + Default,
    {
        let mut vec = Self::with_capacity(arena, len)?;
        for _ in 0..len {
            // SAFETY: capacity was reserved above.
            unsafe { vec.push_unchecked(T::default()) };
        }
        Ok(vec)
    }

    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    fn header(&self) -> Option<&VecHeader> {
        // SAFETY: a non-null header was written by `reallocate` and is owned
        // by this vec.
        self.header.map(|header| unsafe { header.as_ref() })
    }

    fn elements(&self) -> NonNull<T> {
        self.header()
            .map_or(NonNull::dangling(), |header| header.elements.cast())
    }

    pub fn len(&self) -> usize {
        self.header().map_or(0, |header| header.len)
    }

    pub fn capacity(&self) -> usize {
        self.header().map_or(0, |header| header.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the vec holds no pages.
    pub fn is_null(&self) -> bool {
        self.header.is_none()
    }

    /// The page run backing the vec, null if it has none.
    pub fn page_handle(&self) -> PageHandle {
        self.header().map_or(PageHandle::NULL, |header| header.handle)
    }

    fn set_len(&mut self, len: usize) {
        if let Some(mut header) = self.header {
            // SAFETY: see `header`.
            unsafe { header.as_mut().len = len };
        }
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the first `len` elements are initialised.
        unsafe { slice::from_raw_parts(self.elements().as_ptr(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as above, and the vec is borrowed mutably.
        unsafe { slice::from_raw_parts_mut(self.elements().as_ptr(), self.len()) }
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.as_mut_slice().get_mut(index)
    }

    /// Replace the element at `index`, returning the old one.
    ///
    /// # Panics
    ///
    /// If `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: T) -> T {
        let len = self.len();
        match self.get_mut(index) {
            Some(slot) => core::mem::replace(slot, value),
            None => panic!("index {index} out of bounds for a vec of length {len}"),
        }
    }

    /// Make room for `additional` more elements.
    #[track_caller]
    pub fn reserve(&mut self, additional: usize) -> Result<(), AllocError> {
        let len = self.len();
        let required = len.saturating_add(additional);
        if required <= self.capacity() {
            return Ok(());
        }
        let capacity = if self.is_null() {
            additional | MIN_NON_NULL_CAPACITY
        } else {
            required.max(len + len / 4)
        };
        self.reallocate(capacity)
    }

    #[track_caller]
    fn reallocate(&mut self, capacity: usize) -> Result<(), AllocError> {
        let block: Block<VecHeader, T> = container::allocate(self.arena, capacity, TraceKind::Vec)?;
        let len = self.len();
        if let Some(old) = self.header() {
            // SAFETY: both payloads hold at least `len` elements and belong
            // to different runs.
            unsafe {
                self.arena.raw().copy(
                    block.payload.cast(),
                    old.elements,
                    len * size_of::<T>(),
                );
            }
        }
        // SAFETY: the block header is in bounds and suitably aligned.
        unsafe {
            block.header.write(VecHeader {
                len,
                capacity: block.capacity,
                handle: block.handle,
                elements: block.payload.cast(),
            });
        }
        if let Some(old) = self.header.replace(block.header) {
            // SAFETY: the elements were moved out, the old run is released
            // without dropping them.
            unsafe {
                let handle = old.as_ref().handle;
                container::release(self.arena, handle, TraceKind::Vec);
            }
        }
        Ok(())
    }

    /// # Safety
    ///
    /// `len < capacity` must hold.
    unsafe fn push_unchecked(&mut self, value: T) {
        let len = self.len();
        // SAFETY: in bounds per the caller.
        unsafe { self.elements().add(len).write(value) };
        self.set_len(len + 1);
    }

    /// Append one element.
    #[track_caller]
    pub fn push(&mut self, value: T) -> Result<(), AllocError> {
        self.reserve(1)?;
        // SAFETY: reserved above.
        unsafe { self.push_unchecked(value) };
        Ok(())
    }

    /// Append a batch of elements.
    #[track_caller]
    pub fn extend_from_slice(&mut self, values: &[T]) -> Result<(), AllocError>
    where
        T: Clone,
    {
        if values.is_empty() {
            return Ok(());
        }
        self.reserve(values.len())?;
        for value in values {
            // SAFETY: reserved above.
            unsafe { self.push_unchecked(value.clone()) };
        }
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        self.set_len(len - 1);
        // SAFETY: the element at `len - 1` was initialised and is now
        // outside the length.
        Some(unsafe { self.elements().add(len - 1).read() })
    }

    /// Drop every element, keeping the pages.
    pub fn clear(&mut self) {
        let elements: *mut [T] = self.as_mut_slice();
        self.set_len(0);
        // SAFETY: the elements are no longer reachable through the vec.
        unsafe { ptr::drop_in_place(elements) };
    }

    /// Move the contents out, leaving this vec null.
    pub fn take(&mut self) -> Self {
        Self {
            arena: self.arena,
            header: self.header.take(),
            _marker: PhantomData,
        }
    }

    /// A copy of the vec in fresh pages.
    #[track_caller]
    pub fn try_clone(&self) -> Result<Self, AllocError>
    where
        T: Clone,
    {
        if self.is_empty() {
            return Ok(Self::new(self.arena));
        }
        Self::from_slice(self.arena, self.as_slice())
    }

    /// Drop the elements and give the pages back. The vec is null afterwards.
    pub fn free(&mut self) {
        if self.is_null() {
            return;
        }
        self.clear();
        let handle = self.page_handle();
        self.header = None;
        // SAFETY: the run was allocated by `reallocate` and nothing points
        // into it any more.
        unsafe { container::release(self.arena, handle, TraceKind::Vec) };
    }
}

impl<T> Drop for PageVec<'_, T> {
    fn drop(&mut self) {
        self.free();
    }
}

impl<T> Deref for PageVec<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T> DerefMut for PageVec<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<'v, T> IntoIterator for &'v PageVec<'_, T> {
    type Item = &'v T;
    type IntoIter = slice::Iter<'v, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: PartialEq> PartialEq<[T]> for PageVec<'_, T> {
    fn eq(&self, other: &[T]) -> bool {
        self.as_slice() == other
    }
}

impl<T: PartialEq> PartialEq for PageVec<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: fmt::Debug> fmt::Debug for PageVec<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
