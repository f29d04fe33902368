//! Containers whose storage lives in arena pages.
//!
//! Each container borrows the [`Arena`](crate::Arena) it allocates from and
//! owns its pages exclusively. A container that has never allocated, or
//! whose contents were moved out with `take`, is *null*: it behaves as empty
//! and holds no pages.

pub mod map;
pub mod vec;
