use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::ptr::NonNull;

use super::{Entry, TAIL};

/// Iterator over a [`PageMap`](super::PageMap), in bucket order and then
/// chain order.
pub struct Iter<'m, K, V> {
    entries: NonNull<Entry<K, V>>,
    buckets: usize,
    bucket: usize,
    // next overflow index of the chain being walked, or a flag
    chain: u64,
    remaining: usize,
    _marker: PhantomData<&'m (K, V)>,
}

impl<'m, K, V> Iter<'m, K, V> {
    pub(super) fn new(entries: NonNull<Entry<K, V>>, buckets: usize, len: usize) -> Self {
        Self {
            entries,
            buckets,
            bucket: 0,
            chain: TAIL,
            remaining: len,
            _marker: PhantomData,
        }
    }

    fn item(&mut self, index: usize) -> (&'m K, &'m V) {
        // SAFETY: the index is a bucket or a chain link of a live entry, the
        // map is borrowed for 'm.
        let entry = unsafe { self.entries.add(index).as_ref() };
        self.chain = entry.next;
        self.remaining -= 1;
        // SAFETY: live entries have both key and value initialised.
        unsafe { (entry.key.assume_init_ref(), entry.value.assume_init_ref()) }
    }
}

impl<'m, K, V> Iterator for Iter<'m, K, V> {
    type Item = (&'m K, &'m V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        if self.chain > TAIL {
            return Some(self.item(self.chain as usize));
        }
        while self.bucket < self.buckets {
            let index = self.bucket;
            self.bucket += 1;
            // SAFETY: buckets are in bounds.
            if !unsafe { self.entries.add(index).as_ref() }.is_empty() {
                return Some(self.item(index));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self { ..*self }
    }
}

/// Keys of a [`PageMap`](super::PageMap).
pub struct Keys<'m, K, V>(pub(super) Iter<'m, K, V>);

impl<'m, K, V> Iterator for Keys<'m, K, V> {
    type Item = &'m K;

    fn next(&mut self) -> Option<&'m K> {
        self.0.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

/// Values of a [`PageMap`](super::PageMap).
pub struct Values<'m, K, V>(pub(super) Iter<'m, K, V>);

impl<'m, K, V> Iterator for Values<'m, K, V> {
    type Item = &'m V;

    fn next(&mut self) -> Option<&'m V> {
        self.0.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}
