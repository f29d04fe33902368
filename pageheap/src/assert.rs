//! Checks for programmer defects.
//!
//! These are compiled in with the `assertions` feature and skipped otherwise.
//! Resource exhaustion is never reported through here, it is an
//! [`AllocError`](crate::AllocError).

/// Whether invariant checks are compiled in.
pub(crate) const ENABLED: bool = cfg!(feature = "assertions");

macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if $crate::assert::ENABLED && !($cond) {
            panic!($($arg)+);
        }
    };
}
