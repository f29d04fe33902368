//! Allocation site tracing for leak reports.
//!
//! With the `trace` feature every page allocation made through an
//! [`Arena`](crate::Arena) records where it came from. Whatever is still
//! recorded when the arena is torn down has leaked.

use core::fmt::{self, Write as _};
use core::panic::Location;
use core::ptr::NonNull;

use hashbrown::HashMap;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;

use crate::units::HumanSize;

/// What a traced allocation is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceKind {
    /// Pages handed out directly by [`Arena::alloc_pages`](crate::Arena::alloc_pages).
    Raw,
    /// Storage of a [`PageVec`](crate::PageVec).
    Vec,
    /// The table of a [`PageMap`](crate::PageMap).
    MapTable,
    /// A holder page of a [`SharedFactory`](crate::SharedFactory).
    Shared,
}

impl TraceKind {
    /// Kinds that churn too often to be worth tracing outside of debugging.
    pub const fn is_high_churn(self) -> bool {
        matches!(self, Self::MapTable)
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Raw => "raw",
            Self::Vec => "vec",
            Self::MapTable => "map table",
            Self::Shared => "shared holder",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub page_index: usize,
    pub location: &'static Location<'static>,
    pub size: usize,
    pub kind: TraceKind,
}

/// Records live allocations keyed by page address.
#[derive(Debug, Default)]
pub struct LeakTracer {
    records: Mutex<HashMap<usize, TraceRecord, FxBuildHasher>>,
}

impl LeakTracer {
    /// Whether tracing is compiled in.
    pub const ENABLED: bool = cfg!(feature = "trace");

    pub fn new() -> Self {
        Self::default()
    }

    fn skips(kind: TraceKind) -> bool {
        !Self::ENABLED || (kind.is_high_churn() && !crate::assert::ENABLED)
    }

    /// Record an allocation starting at `address`.
    pub fn record(&self, address: NonNull<u8>, record: TraceRecord) {
        if Self::skips(record.kind) {
            return;
        }
        let previous = self.records.lock().insert(address.as_ptr() as usize, record);
        invariant!(
            previous.is_none(),
            "address {address:p} traced twice, first by {:?}",
            previous.map(|record| record.location)
        );
    }

    /// Forget the allocation at `address`.
    pub fn remove(&self, address: NonNull<u8>, kind: TraceKind) {
        if Self::skips(kind) {
            return;
        }
        let removed = self.records.lock().remove(&(address.as_ptr() as usize));
        invariant!(removed.is_some(), "address {address:p} was never traced");
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_leak(&self) -> bool {
        !self.is_empty()
    }

    /// One line per live allocation, ordered by page index.
    pub fn leak_report(&self) -> String {
        let mut records: Vec<TraceRecord> = self.records.lock().values().copied().collect();
        records.sort_unstable_by_key(|record| record.page_index);

        let mut report = String::new();
        if records.is_empty() {
            return report;
        }
        let total: usize = records.iter().map(|record| record.size).sum();
        let _ = writeln!(
            report,
            "{} live allocations, {}",
            records.len(),
            HumanSize(total)
        );
        for record in &records {
            let _ = writeln!(
                report,
                "  page {} ({}, {}) allocated at {}",
                record.page_index,
                record.kind,
                HumanSize(record.size),
                record.location
            );
        }
        report
    }
}
