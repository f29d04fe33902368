//! A hash map stored in one arena page run.
//!
//! The table is a flat array of entries. Indices below `mask + 1` are
//! buckets; the upper half is an overflow area that holds chain links.
//! Links are indices into the same array, so the table can be moved
//! byte for byte.
//!
//! ```text
//!  0 .. mask            mask+1 .. free        free .. table_len
//! [ buckets          ][ chain links        ][ unused            ]
//! ```
//!
//! `free` only moves backwards when the most recently appended link is
//! deleted. Everything else is reclaimed by the next rehash.

use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, MaybeUninit};
use core::ptr::{self, NonNull};

use crate::container::{self, Block};
use crate::error::AllocError;
use crate::memory::Arena;
use crate::page::PageHandle;
use crate::trace::TraceKind;

mod iter;
mod key;

pub use iter::{Iter, Keys, Values};
pub use key::{DefaultKeys, FnKeys, HASH_SEED, KeyStrategy, MapKey, combine_hash, hash_bytes};

#[cfg(test)]
mod tests;

// `Entry::next` flags. Real links always point past the buckets, which
// start at index 8, so they never collide with the flags.
const EMPTY: u64 = 0;
const TAIL: u64 = 1;

const MIN_BUCKETS: usize = 8;

/// Table length for `count` entries: a power of two of at least `count`,
/// doubled once more for the overflow area. `None` if that overflows.
fn table_len_for(count: usize) -> Option<usize> {
    count
        .max(MIN_BUCKETS)
        .checked_next_power_of_two()?
        .checked_mul(2)
}

#[repr(C)]
struct MapHeader {
    count: usize,
    mask: usize,
    free: usize,
    table_len: usize,
    handle: PageHandle,
}

#[repr(C)]
struct Entry<K, V> {
    next: u64,
    key: MaybeUninit<K>,
    value: MaybeUninit<V>,
}

impl<K, V> Entry<K, V> {
    fn is_empty(&self) -> bool {
        self.next == EMPTY
    }
}

/// A hash map whose header and entry table share one page run.
///
/// Collisions chain through an overflow area inside the table instead of
/// separate allocations. Growth rehashes into a table twice the size.
///
/// ```
/// use pageheap::{Arena, KB, PageMap};
///
/// let arena = Arena::new(64 * KB).unwrap();
/// let mut map = PageMap::new(&arena);
/// map.put("one", 1).unwrap();
/// map.put("two", 2).unwrap();
/// assert_eq!(map.get(&"two"), Some(&2));
/// assert_eq!(map.remove(&"one"), Some(1));
/// assert_eq!(map.len(), 1);
/// ```
pub struct PageMap<'a, K, V, S = DefaultKeys> {
    arena: &'a Arena,
    header: Option<NonNull<MapHeader>>,
    strategy: S,
    _marker: PhantomData<(K, V)>,
}

// SAFETY: the map owns its keys and values.
unsafe impl<K: Send, V: Send, S: Send> Send for PageMap<'_, K, V, S> {}
unsafe impl<K: Sync, V: Sync, S: Sync> Sync for PageMap<'_, K, V, S> {}

impl<'a, K: MapKey, V> PageMap<'a, K, V> {
    /// A null map. The table is allocated by the first insertion.
    pub const fn new(arena: &'a Arena) -> Self {
        Self {
            arena,
            header: None,
            strategy: DefaultKeys,
            _marker: PhantomData,
        }
    }

    #[track_caller]
    pub fn with_capacity(arena: &'a Arena, capacity: usize) -> Result<Self, AllocError> {
        Self::with_strategy(arena, capacity, DefaultKeys)
    }

    /// A map holding `pairs`. Later duplicates overwrite earlier ones.
    #[track_caller]
    pub fn from_pairs<I>(arena: &'a Arena, pairs: I) -> Result<Self, AllocError>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let pairs = pairs.into_iter();
        let mut map = Self::with_capacity(arena, pairs.size_hint().0)?;
        for (key, value) in pairs {
            map.put(key, value)?;
        }
        Ok(map)
    }
}

impl<'a, K, V, S> PageMap<'a, K, V, S> {
    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    fn header(&self) -> Option<&MapHeader> {
        // SAFETY: a non-null header was written by `allocate_table` and is
        // owned by this map.
        self.header.map(|header| unsafe { header.as_ref() })
    }

    fn header_mut(&mut self) -> Option<&mut MapHeader> {
        // SAFETY: as above, and the map is borrowed mutably.
        self.header.map(|mut header| unsafe { header.as_mut() })
    }

    fn entries_of(header: NonNull<MapHeader>) -> NonNull<Entry<K, V>> {
        let offset = container::payload_offset::<MapHeader, Entry<K, V>>();
        // SAFETY: the table starts `offset` bytes into the run.
        unsafe { header.cast::<u8>().add(offset).cast() }
    }

    pub fn len(&self) -> usize {
        self.header().map_or(0, |header| header.count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the map holds no pages.
    pub fn is_null(&self) -> bool {
        self.header.is_none()
    }

    /// Number of entries the table can hold before the next rehash,
    /// counting the overflow area.
    pub fn capacity(&self) -> usize {
        self.header().map_or(0, |header| header.table_len)
    }

    pub fn page_handle(&self) -> PageHandle {
        self.header().map_or(PageHandle::NULL, |header| header.handle)
    }

    /// Pointer to entry `index` of the table behind `header`.
    fn slot_of(header: NonNull<MapHeader>, index: usize) -> *mut Entry<K, V> {
        // SAFETY: see `header`.
        let table_len = unsafe { header.as_ref().table_len };
        assert!(
            index < table_len,
            "map table index {index} out of bounds of {table_len}"
        );
        // SAFETY: in bounds of the table.
        unsafe { Self::entries_of(header).as_ptr().add(index) }
    }

    fn slot(&self, index: usize) -> *mut Entry<K, V> {
        match self.header {
            Some(header) => Self::slot_of(header, index),
            None => unreachable!("slot access on a null map"),
        }
    }

    /// Allocate and clear a table sized for `count` entries.
    #[track_caller]
    fn allocate_table(arena: &Arena, count: usize) -> Result<NonNull<MapHeader>, AllocError> {
        // a length that does not fit a usize cannot fit the arena either,
        // `allocate` reports it as out of memory
        let table_len = table_len_for(count).unwrap_or(usize::MAX);
        let block: Block<MapHeader, Entry<K, V>> =
            container::allocate(arena, table_len, TraceKind::MapTable)?;
        // SAFETY: the block holds at least `table_len` entries.
        unsafe {
            arena.raw().zero(
                block.payload.cast(),
                table_len * mem::size_of::<Entry<K, V>>(),
            );
            block.header.write(MapHeader {
                count: 0,
                mask: (table_len >> 1) - 1,
                free: table_len >> 1,
                table_len,
                handle: block.handle,
            });
        }
        Ok(block.header)
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        match self.header {
            Some(header) => {
                // SAFETY: see `header`.
                let (mask, count) = unsafe { (header.as_ref().mask, header.as_ref().count) };
                Iter::new(Self::entries_of(header), mask + 1, count)
            }
            None => Iter::new(NonNull::dangling(), 0, 0),
        }
    }

    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys(self.iter())
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values(self.iter())
    }

    /// Move the contents out, leaving this map null.
    pub fn take(&mut self) -> Self
    where
        S: Clone,
    {
        Self {
            arena: self.arena,
            header: self.header.take(),
            strategy: self.strategy.clone(),
            _marker: PhantomData,
        }
    }

    /// Drop every entry and give the pages back. The map is null afterwards.
    pub fn free(&mut self) {
        let Some(header) = self.header.take() else {
            return;
        };
        // SAFETY: see `header`.
        let (mask, handle) = unsafe { (header.as_ref().mask, header.as_ref().handle) };
        if mem::needs_drop::<K>() || mem::needs_drop::<V>() {
            for bucket in 0..=mask {
                let mut index = bucket;
                loop {
                    // SAFETY: buckets and chain links are in bounds, live
                    // entries are initialised and dropped exactly once.
                    let entry = unsafe { &mut *Self::slot_of(header, index) };
                    if entry.is_empty() {
                        break;
                    }
                    unsafe {
                        entry.key.assume_init_drop();
                        entry.value.assume_init_drop();
                    }
                    if entry.next == TAIL {
                        break;
                    }
                    index = entry.next as usize;
                }
            }
        }
        // SAFETY: the entries were dropped above.
        unsafe { container::release(self.arena, handle, TraceKind::MapTable) };
    }
}

impl<'a, K, V, S: KeyStrategy<K>> PageMap<'a, K, V, S> {
    /// A map using `strategy` to hash and compare keys, with room for
    /// `capacity` entries.
    #[track_caller]
    pub fn with_strategy(arena: &'a Arena, capacity: usize, strategy: S) -> Result<Self, AllocError> {
        Ok(Self {
            arena,
            header: Some(Self::allocate_table(arena, capacity)?),
            strategy,
            _marker: PhantomData,
        })
    }

    fn bucket_of(&self, key: &K, mask: usize) -> usize {
        (self.strategy.hash(key) as usize) & mask
    }

    /// Index of the entry holding `key`.
    fn find(&self, key: &K) -> Option<usize> {
        let header = self.header()?;
        let mut index = self.bucket_of(key, header.mask);
        // SAFETY: buckets and chain links are in bounds.
        let mut entry = unsafe { &*self.slot(index) };
        if entry.is_empty() {
            return None;
        }
        loop {
            // SAFETY: live entries have their key initialised.
            if self.strategy.equal(unsafe { entry.key.assume_init_ref() }, key) {
                return Some(index);
            }
            if entry.next == TAIL {
                return None;
            }
            index = entry.next as usize;
            entry = unsafe { &*self.slot(index) };
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let index = self.find(key)?;
        // SAFETY: `find` only returns live entries.
        Some(unsafe { (*self.slot(index)).value.assume_init_ref() })
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let index = self.find(key)?;
        // SAFETY: as above, and the map is borrowed mutably.
        Some(unsafe { (*self.slot(index)).value.assume_init_mut() })
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Make sure `additional` more entries can be appended without a
    /// rehash.
    #[track_caller]
    pub fn reserve(&mut self, additional: usize) -> Result<(), AllocError> {
        let state = self
            .header()
            .map(|header| (header.count, header.free, header.table_len));
        match state {
            None => {
                self.header = Some(Self::allocate_table(self.arena, additional)?);
                Ok(())
            }
            Some((count, free, table_len))
                if free.checked_add(additional).is_none_or(|end| end > table_len) =>
            {
                self.grow(count.saturating_add(additional))
            }
            Some(_) => Ok(()),
        }
    }

    #[track_caller]
    fn grow(&mut self, count: usize) -> Result<(), AllocError> {
        let new = Self::allocate_table(self.arena, count)?;
        let Some(old) = self.header.replace(new) else {
            return Ok(());
        };
        // SAFETY: the old header stays valid until its run is released.
        let (old_mask, old_len, handle) =
            unsafe { (old.as_ref().mask, old.as_ref().table_len, old.as_ref().handle) };
        tracing::debug!(from = old_len, to = ?table_len_for(count), "rehashing page map");

        for bucket in 0..=old_mask {
            let mut index = bucket;
            loop {
                // SAFETY: buckets and chain links of the old table are in
                // bounds. Each live entry is moved out exactly once and the
                // old run is released without dropping.
                let (next, key, value) = unsafe {
                    let entry = &*Self::slot_of(old, index);
                    if entry.is_empty() {
                        break;
                    }
                    (entry.next, entry.key.assume_init_read(), entry.value.assume_init_read())
                };
                self.insert_absent(key, value);
                if next == TAIL {
                    break;
                }
                index = next as usize;
            }
        }
        // SAFETY: every entry was moved into the new table.
        unsafe { container::release(self.arena, handle, TraceKind::MapTable) };
        Ok(())
    }

    /// Insert or overwrite, returning the previous value.
    #[track_caller]
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>, AllocError> {
        self.reserve(1)?;
        if let Some(index) = self.find(&key) {
            // SAFETY: `find` only returns live entries.
            let slot = unsafe { (*self.slot(index)).value.assume_init_mut() };
            return Ok(Some(mem::replace(slot, value)));
        }
        self.insert_absent(key, value);
        Ok(None)
    }

    /// Append `key`, which must not be present, without growing.
    fn insert_absent(&mut self, key: K, value: V) {
        let Some(header) = self.header() else {
            unreachable!("insert into a null map");
        };
        let (mask, free, table_len) = (header.mask, header.free, header.table_len);
        let bucket = self.bucket_of(&key, mask);

        // SAFETY: every pointer below is a bucket, a chain link or `free`,
        // all in bounds of the table, and the map is borrowed mutably.
        unsafe {
            let slot = self.slot(bucket);
            if (*slot).is_empty() {
                slot.write(Entry {
                    next: TAIL,
                    key: MaybeUninit::new(key),
                    value: MaybeUninit::new(value),
                });
            } else {
                let mut tail = slot;
                loop {
                    invariant!(
                        !self.strategy.equal((*tail).key.assume_init_ref(), &key),
                        "direct put of a key that is already present"
                    );
                    if (*tail).next == TAIL {
                        break;
                    }
                    tail = self.slot((*tail).next as usize);
                }
                assert!(free < table_len, "direct put into a full map table");
                self.slot(free).write(Entry {
                    next: TAIL,
                    key: MaybeUninit::new(key),
                    value: MaybeUninit::new(value),
                });
                (*tail).next = free as u64;
                if let Some(header) = self.header_mut() {
                    header.free += 1;
                }
            }
        }
        if let Some(header) = self.header_mut() {
            header.count += 1;
        }
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let header = self.header()?;
        let (mask, free) = (header.mask, header.free);
        let bucket = self.bucket_of(key, mask);

        // SAFETY: as in `insert_absent`. Keys and values are moved or
        // dropped exactly once, vacated slots are marked empty.
        let (value, vacated) = unsafe {
            let head = self.slot(bucket);
            if (*head).is_empty() {
                return None;
            }
            let head_matches = self.strategy.equal((*head).key.assume_init_ref(), key);

            if (*head).next == TAIL {
                if !head_matches {
                    return None;
                }
                (*head).next = EMPTY;
                (*head).key.assume_init_drop();
                ((*head).value.assume_init_read(), None)
            } else if head_matches {
                // pull the first link up into the bucket
                let first = (*head).next as usize;
                (*head).key.assume_init_drop();
                let value = (*head).value.assume_init_read();
                ptr::copy_nonoverlapping(self.slot(first), head, 1);
                (*self.slot(first)).next = EMPTY;
                (value, Some(first))
            } else {
                let mut target = None;
                let mut previous = bucket;
                let mut last = (*head).next as usize;
                loop {
                    let entry = self.slot(last);
                    if target.is_none()
                        && self.strategy.equal((*entry).key.assume_init_ref(), key)
                    {
                        target = Some(entry);
                    }
                    if (*entry).next == TAIL {
                        break;
                    }
                    previous = last;
                    last = (*entry).next as usize;
                }
                let target = target?;
                let last_entry = self.slot(last);
                (*target).key.assume_init_drop();
                let value = (*target).value.assume_init_read();
                if target != last_entry {
                    // the last link fills the hole and the chain is cut there
                    ptr::copy_nonoverlapping(&(*last_entry).key, &mut (*target).key, 1);
                    ptr::copy_nonoverlapping(&(*last_entry).value, &mut (*target).value, 1);
                }
                (*self.slot(previous)).next = TAIL;
                (*last_entry).next = EMPTY;
                (value, Some(last))
            }
        };

        if let Some(header) = self.header_mut() {
            header.count -= 1;
            if vacated.is_some_and(|index| index + 1 == free) {
                header.free -= 1;
            }
        }
        Some(value)
    }

    /// A loader for keys known to be absent, with room reserved for
    /// `additional` of them.
    #[track_caller]
    pub fn bulk_loader(&mut self, additional: usize) -> Result<BulkLoader<'_, 'a, K, V, S>, AllocError> {
        self.reserve(additional)?;
        Ok(BulkLoader { map: self })
    }
}

/// Inserts keys that are known not to be in the map yet.
///
/// Skips the lookup `put` performs. Inserting a key that is already present
/// is caught with the `assertions` feature and otherwise leaves the map
/// with two entries for the key.
pub struct BulkLoader<'m, 'a, K, V, S = DefaultKeys> {
    map: &'m mut PageMap<'a, K, V, S>,
}

impl<K, V, S: KeyStrategy<K>> BulkLoader<'_, '_, K, V, S> {
    #[track_caller]
    pub fn direct_put(&mut self, key: K, value: V) -> Result<(), AllocError> {
        self.map.reserve(1)?;
        self.map.insert_absent(key, value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K, V, S> Drop for PageMap<'_, K, V, S> {
    fn drop(&mut self) {
        self.free();
    }
}

impl<'m, K, V, S> IntoIterator for &'m PageMap<'_, K, V, S> {
    type Item = (&'m K, &'m V);
    type IntoIter = Iter<'m, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for PageMap<'_, K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
