//! Allocation error types.

use thiserror::Error;

use crate::page::ArenaStats;

/// Errors returned by allocating operations.
///
/// Only resource exhaustion is reported as a value. Misuse such as freeing a
/// page twice is a programmer defect and is caught by the `assertions`
/// feature instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The arena has no free run large enough and cannot bump any further.
    #[error("out of memory when allocating {requested_pages} pages: {stats}")]
    OutOfMemory {
        /// Number of base pages requested.
        requested_pages: usize,
        /// Arena utilisation at the time of the failure.
        stats: ArenaStats,
    },
    /// The requested arena cannot hold a single base page.
    #[error("arena of {size} bytes cannot hold a single page")]
    ArenaTooSmall { size: usize },
    /// The raw memory source could not provide the backing buffer.
    #[error("raw memory source failed to provide {size} bytes")]
    SourceExhausted { size: usize },
}

impl AllocError {
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}
