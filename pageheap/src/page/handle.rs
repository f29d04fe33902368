use core::fmt;

use crate::units::BASE_PAGE_SHIFT;

const PAGE_COUNT_SHIFT: u32 = 32;
const PAGE_INDEX_MASK: u64 = (1 << PAGE_COUNT_SHIFT) - 1;

/// Largest page index or page count a handle can encode.
pub const MAX_PAGES: usize = PAGE_INDEX_MASK as usize;

/// A run of contiguous base pages inside an arena.
///
/// One machine word packing `(page_count, page_index)`. Index `0` is never a
/// valid page, so the all-zero word is the null handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct PageHandle(u64);

impl PageHandle {
    pub const NULL: Self = Self(0);

    /// Build a handle from its parts.
    ///
    /// Handles are normally obtained from an allocation. Building one by hand
    /// is only meaningful to re-describe a run that is already live.
    pub const fn from_parts(page_count: usize, page_index: usize) -> Self {
        invariant!(
            page_count <= MAX_PAGES && page_index <= MAX_PAGES,
            "page handle parts out of range"
        );
        Self(((page_count as u64) << PAGE_COUNT_SHIFT) | page_index as u64)
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Index of the first base page, counted from `1`.
    pub const fn page_index(self) -> usize {
        (self.0 & PAGE_INDEX_MASK) as usize
    }

    /// Number of base pages in the run.
    pub const fn page_count(self) -> usize {
        (self.0 >> PAGE_COUNT_SHIFT) as usize
    }

    /// Size of the run in bytes.
    pub const fn byte_size(self) -> usize {
        self.page_count() << BASE_PAGE_SHIFT
    }

    pub const fn to_bits(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("PageHandle(null)");
        }
        f.debug_struct("PageHandle")
            .field("index", &self.page_index())
            .field("count", &self.page_count())
            .finish()
    }
}
