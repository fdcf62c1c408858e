//! Bounded FIFO stream buffer with zero-copy, lease-based I/O.
//!
//! # Scope
//!
//! A ring of `N` slots of `T` shared between one producer side and one
//! consumer side. Producers lease free capacity with
//! [`prepare`](StreamBuffer::prepare), fill it in place, and publish by
//! dropping the lease; consumers lease published data with
//! [`read`](StreamBuffer::read), observe it in place, and retire it by
//! dropping the lease. Acquisition is offered synchronously (try now or fail
//! with [`OutOfRange`]) and asynchronously (yield to the executor until the
//! request fits). Leases may be released out of order; visibility to the
//! peer side always advances in acquire order, so the data stream stays
//! strictly FIFO.
//!
//! # Design themes
//!
//! - Fixed, compile-time capacity; one slot is reserved to tell full from
//!   empty, so `N` slots store `N - 1` elements.
//! - No locks while a lease is alive; constant-time acquire and release
//!   under one mutex per side.
//! - No allocation in the I/O path; the default storage is an inline array.
//! - The async layer is a thin retry loop over the synchronous calls and
//!   carries no executor dependency.
//!
//! # Module map
//!
//! - `ring`: the buffer core, cursor protocol, and both lease managers.
//! - `lease`: write/read leases and their in-place access surface.
//! - `iter`: iterators over ring regions.
//! - `registry`: ordered slab of outstanding leases.
//! - `storage`: the contiguous-storage seam.
//! - `error`: the out-of-range lease error.
//!
//! # Example
//!
//! ```
//! use streambuf::StreamBuffer;
//!
//! let buf: StreamBuffer<u32, 8> = StreamBuffer::new();
//!
//! let mut w = buf.prepare(3).unwrap();
//! w.fill_with(|i| i as u32 * 2);
//! drop(w); // publish
//!
//! assert_eq!(buf.len(), 3);
//! let r = buf.read(3).unwrap();
//! assert_eq!(r.to_vec(), vec![0, 2, 4]);
//! drop(r); // retire
//!
//! assert!(buf.is_empty());
//! ```
//!
//! # Safety
//!
//! Slot access uses raw pointers governed by the region protocol documented
//! in `ring`; every `unsafe` block states the invariant it relies on. Read
//! those notes before extending the internals.

pub mod error;
mod iter;
mod lease;
mod registry;
mod ring;
pub mod storage;
mod sync;
#[cfg(test)]
pub mod test_utils;

pub use error::OutOfRange;
pub use iter::{Iter, IterMut};
pub use lease::{ReadLease, WriteLease};
pub use ring::StreamBuffer;
pub use storage::Storage;
