//! Size constants and human friendly size formatting.

use core::fmt;

/// log2 of [`BASE_PAGE_SIZE`].
pub const BASE_PAGE_SHIFT: u32 = 8;

/// Size in bytes of one base page, the allocation granule of the arena.
pub const BASE_PAGE_SIZE: usize = 1 << BASE_PAGE_SHIFT;

pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;
pub const GB: usize = 1024 * MB;

/// Number of base pages needed to hold `bytes` bytes.
pub const fn pages_for(bytes: usize) -> usize {
    (bytes + BASE_PAGE_SIZE - 1) >> BASE_PAGE_SHIFT
}

/// Byte size of `pages` base pages.
pub const fn pages_to_bytes(pages: usize) -> usize {
    pages << BASE_PAGE_SHIFT
}

/// Displays a byte count as `B`, `KB`, `MB` or `GB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanSize(pub usize);

const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut size = self.0 as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            write!(f, "{}{}", self.0, UNITS[0])
        } else {
            write!(f, "{size:.2}{}", UNITS[unit])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(BASE_PAGE_SIZE), 1);
        assert_eq!(pages_for(BASE_PAGE_SIZE + 1), 2);
        assert_eq!(pages_to_bytes(16), 4096);
    }

    #[test]
    fn human_size() {
        assert_eq!(HumanSize(1).to_string(), "1B");
        assert_eq!(HumanSize(300).to_string(), "300B");
        assert_eq!(HumanSize(1024).to_string(), "1.00KB");
        assert_eq!(HumanSize(5 * MB + 300 * KB).to_string(), "5.29MB");
        assert_eq!(HumanSize(2 * GB).to_string(), "2.00GB");
        // GB is the largest unit
        assert_eq!(HumanSize(4096 * GB).to_string(), "4096.00GB");
    }
}
