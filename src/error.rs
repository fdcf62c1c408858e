//! Error types for lease acquisition.
//!
//! There is a single recoverable failure mode: asking for more elements than
//! the buffer can currently lend. Everything else the buffer refuses to do is
//! either prevented at compile time (outstanding leases borrow the buffer) or
//! fails fast with a panic.

use std::fmt;

/// A lease request exceeded what the buffer could lend at the time of the
/// call.
///
/// Returned by [`StreamBuffer::prepare`](crate::StreamBuffer::prepare) when
/// the requested length exceeds the free capacity, and by
/// [`StreamBuffer::read`](crate::StreamBuffer::read) when it exceeds the
/// published data. The failed call leaves the buffer unchanged; callers may
/// retry later, ask for less, or wait through the async variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutOfRange {
    /// Number of elements the caller asked for.
    pub requested: usize,
    /// Number of elements that were lendable when the request was made.
    pub available: usize,
}

impl fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested {} elements but only {} were lendable",
            self.requested, self.available
        )
    }
}

impl std::error::Error for OutOfRange {}
