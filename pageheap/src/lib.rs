//! A page-granular arena allocator and the containers that live on top of it.
//!
//! All storage handed out by this crate comes from one large backing buffer
//! owned by an [`Arena`]. The buffer is carved into fixed size pages
//! ([`BASE_PAGE_SIZE`] bytes each) that are served by handle, recycled through
//! intrusive free lists, and cached per worker thread so that the shared arena
//! lock is taken once per batch instead of once per request.
//!
//! ```text
//! Arena
//! ├── SpinLock<PageArena>      (free lists + bump index, the only scarce resource)
//! ├── CacheRegistry            (one ThreadLocalCache per worker)
//! └── LeakTracer               (allocation sites, `trace` feature)
//!
//! PageVec / PageMap / SharedFactory
//! └── header at page offset 0, payload right after it
//!
//! BumpArena                    (chained blocks for never-freed objects)
//! ```
//!
//! Containers borrow the arena they were created from, own their pages
//! exclusively, and give them back when freed or dropped.

extern crate self as pageheap;

#[macro_use]
mod assert;

pub mod bump;
pub mod cache;
pub mod collections;
pub mod config;
pub mod error;
pub mod memory;
pub mod page;
pub mod raw;
pub mod shared;
pub mod sync;
pub mod trace;
pub mod units;
pub mod worker;

pub(crate) mod container;

pub use bump::BumpArena;
pub use cache::ThreadLocalCache;
pub use collections::map::{
    BulkLoader, DefaultKeys, FnKeys, KeyStrategy, MapKey, PageMap, hash_bytes,
};
pub use collections::vec::PageVec;
pub use config::ArenaConfig;
pub use error::AllocError;
pub use memory::Arena;
pub use page::{ArenaStats, PageArena, PageHandle};
pub use raw::{RawMemory, SystemMemory};
pub use shared::{SharedFactory, SharedRef};
pub use sync::SpinLock;
pub use trace::{LeakTracer, TraceKind};
pub use units::{BASE_PAGE_SIZE, GB, KB, MB};

pub use pageheap_derive::MapKey;
