//! Bounded FIFO ring with zero-copy, lease-based I/O.
//!
//! # Design
//!
//! The buffer is a ring of `N` slots carved into four regions by four
//! cursors, all arithmetic mod `N`:
//!
//! ```text
//! before_start ..= start        region leased to readers (retire pending)
//! start        ..= stop         published data (the live contents)
//! stop         ..= after_stop   region leased to writers (publish pending)
//! after_stop   ..= before_start free capacity
//! ```
//!
//! Two independent managers share the storage. The write manager hands out
//! leases over free capacity and owns `stop`/`after_stop`; the read manager
//! hands out leases over published data and owns `before_start`/`start`.
//! Each manager tracks its outstanding leases in an ordered
//! [`LeaseRegistry`]; releasing the oldest lease advances the manager's
//! publish (or retire) cursor past every contiguously released lease, so
//! leases may be released out of order while readers always observe a gapless
//! prefix of the write-acquire order.
//!
//! One slot is kept permanently free to distinguish full from empty, so the
//! usable capacity is `N - 1`. The reserve is charged to the write side only.
//!
//! # Locking
//!
//! Each manager has one mutex guarding its registry and cursor updates.
//! Acquire and release are constant-time critical sections; no lock is held
//! while a lease is alive, and the two managers never take each other's lock,
//! so writer acquire/release does not block reader acquire/release.
//!
//! # Ordering rationale
//!
//! ```text
//! Producer fills slots, then Release-stores `stop`     →  consumer Acquire-loads `stop`, then reads slots
//! Consumer reads slots, then Release-stores `before_start` →  producer Acquire-loads `before_start`, then writes slots
//! ```
//!
//! This establishes happens-before for the slot handoff in both directions.
//! A manager's own cursors are only mutated under its mutex, so same-side
//! loads are `Relaxed`.
//!
//! # Threading
//!
//! Acquire and release are safe under preemptive multithreading. The
//! container accessors (`front`, `back`, `get`, `iter`, `Index`) return
//! references into published slots; a published slot is only rewritten after
//! a read lease covering it has been acquired *and* released, so under the
//! intended single-consumer discipline the consumer cannot invalidate a
//! reference it is still holding. `len` is an unserialised snapshot.
//!
//! # Safety
//!
//! Slot access uses raw pointers derived from the storage cell; every
//! `unsafe` block states the protocol fact that justifies it. The region
//! discipline guarantees that no two live leases cover the same slot.

use std::cell::UnsafeCell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::ops::Index;
use std::pin::Pin;
use std::task::{Context, Poll};

use crossbeam_utils::CachePadded;

use crate::error::OutOfRange;
use crate::iter::Iter;
use crate::lease::{ReadLease, WriteLease};
use crate::registry::{LeaseRegistry, LeaseToken};
use crate::storage::Storage;
use crate::sync::{AtomicUsize, Mutex, Ordering};

/// Distance from `a` to `b` on the circular axis, mod `N`.
#[inline]
pub(crate) const fn distance<const N: usize>(a: usize, b: usize) -> usize {
    if b >= a {
        b - a
    } else {
        N - (a - b)
    }
}

/// One manager half of the buffer.
///
/// For the read manager `lent_begin` is `before_start` and `lendable_begin`
/// is `start`; for the write manager they are `stop` and `after_stop`. The
/// half's lendable region ends at the peer's `lent_begin`.
struct Side {
    /// Start of the oldest outstanding lease. Advanced on oldest release,
    /// publishing (write side) or retiring (read side) every contiguously
    /// released lease.
    lent_begin: AtomicUsize,
    /// Start of the next lease to hand out. Advanced on acquire.
    lendable_begin: AtomicUsize,
    /// Outstanding leases in acquire order (equals ring order).
    registry: Mutex<LeaseRegistry>,
}

impl Side {
    fn new() -> Self {
        Self::with_cursors(0, 0)
    }

    fn with_cursors(lent_begin: usize, lendable_begin: usize) -> Self {
        Self {
            lent_begin: AtomicUsize::new(lent_begin),
            lendable_begin: AtomicUsize::new(lendable_begin),
            registry: Mutex::new(LeaseRegistry::new()),
        }
    }
}

/// Bounded FIFO stream buffer over `N` slots of `T`, backed by `S`.
///
/// Producers call [`prepare`](Self::prepare) for a write lease, fill it in
/// place, and drop it to publish. Consumers call [`read`](Self::read) for a
/// read lease over published data and drop it to retire. The async variants
/// retry with an executor yield until the request fits.
///
/// Usable capacity is `N - 1`; `N` must be greater than zero (enforced at
/// compile time).
pub struct StreamBuffer<T, const N: usize, S = [T; N]>
where
    S: Storage<T>,
{
    storage: UnsafeCell<S>,
    read: CachePadded<Side>,
    write: CachePadded<Side>,
    _elem: PhantomData<T>,
}

// SAFETY: slot access is serialised by the lease protocol: each slot belongs
// to exactly one region at any moment and only the lease covering it (or the
// published-data accessors) may touch it. Cursors are atomic and registries
// are mutex-guarded. Sharing hands out `&T` (T: Sync), moves values in
// through write leases (T: Send) and may clone the storage concurrently
// (S: Sync).
unsafe impl<T, const N: usize, S> Sync for StreamBuffer<T, N, S>
where
    T: Send + Sync,
    S: Storage<T> + Sync,
{
}

impl<T: Default, const N: usize> StreamBuffer<T, N, [T; N]> {
    /// Creates a buffer whose inline storage is default-initialised.
    pub fn new() -> Self {
        Self::with_storage(std::array::from_fn(|_| T::default()))
    }
}

impl<T: Default, const N: usize> Default for StreamBuffer<T, N, [T; N]> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize, S: Storage<T>> StreamBuffer<T, N, S> {
    const CAPACITY: usize = {
        assert!(N > 0, "StreamBuffer capacity must be > 0");
        assert!(S::LEN == N, "storage length must equal the capacity N");
        N
    };

    /// Slots the write side keeps free so that a full buffer still satisfies
    /// `start != stop`.
    const WRITE_RESERVE: usize = 1;

    /// Creates a buffer over caller-provided storage.
    pub fn with_storage(storage: S) -> Self {
        // Force compile-time validation of the capacity parameters.
        let _ = Self::CAPACITY;

        Self {
            storage: UnsafeCell::new(storage),
            read: CachePadded::new(Side::new()),
            write: CachePadded::new(Side::new()),
            _elem: PhantomData,
        }
    }

    /// Number of published elements.
    ///
    /// This is an unserialised snapshot: elements inside open write leases
    /// are not counted until the publishing release.
    pub fn len(&self) -> usize {
        let start = self.read.lendable_begin.load(Ordering::Acquire);
        let stop = self.write.lent_begin.load(Ordering::Acquire);
        distance::<N>(start, stop)
    }

    /// Returns `true` when no published data is available.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when the published data fills the usable capacity.
    pub fn is_full(&self) -> bool {
        let start = self.read.lendable_begin.load(Ordering::Acquire);
        let stop = self.write.lent_begin.load(Ordering::Acquire);
        (stop + 1) % N == start
    }

    /// Usable capacity: `N - 1`.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Borrows the published element at logical `index`, or `None` when
    /// `index >= len()`.
    pub fn get(&self, index: usize) -> Option<&T> {
        let start = self.read.lendable_begin.load(Ordering::Acquire);
        let stop = self.write.lent_begin.load(Ordering::Acquire);
        if index >= distance::<N>(start, stop) {
            return None;
        }
        // SAFETY: the slot is inside [start, stop), which is published and
        // not covered by any write lease; see the module threading notes.
        Some(unsafe { &*self.slot_ptr((start + index) % N) })
    }

    /// Borrows the oldest published element.
    pub fn front(&self) -> Option<&T> {
        self.get(0)
    }

    /// Borrows the newest published element.
    pub fn back(&self) -> Option<&T> {
        let len = self.len();
        if len == 0 {
            None
        } else {
            self.get(len - 1)
        }
    }

    /// Iterates over the published elements in logical order.
    ///
    /// The iterator is exact-size, double-ended and restartable (`Clone`);
    /// it covers the contents snapshotted at creation.
    pub fn iter(&self) -> Iter<'_, T, N, S> {
        let start = self.read.lendable_begin.load(Ordering::Acquire);
        let stop = self.write.lent_begin.load(Ordering::Acquire);
        Iter::new(self, start, distance::<N>(start, stop))
    }

    /// Resets all four cursors to zero, forgetting the published contents.
    ///
    /// Taking `&mut self` guarantees at compile time that no lease is
    /// outstanding.
    pub fn clear(&mut self) {
        debug_assert!(self
            .read
            .registry
            .lock()
            .expect("lease registry mutex poisoned")
            .is_empty());
        debug_assert!(self
            .write
            .registry
            .lock()
            .expect("lease registry mutex poisoned")
            .is_empty());

        self.read.lent_begin.store(0, Ordering::Release);
        self.read.lendable_begin.store(0, Ordering::Release);
        self.write.lent_begin.store(0, Ordering::Release);
        self.write.lendable_begin.store(0, Ordering::Release);
    }

    /// Leases `n` slots of free capacity for in-place writing.
    ///
    /// Fails without side effects when `n` exceeds the currently lendable
    /// capacity. Dropping the returned lease publishes the range.
    pub fn prepare(&self, n: usize) -> Result<WriteLease<'_, T, N, S>, OutOfRange> {
        let (lo, hi, token) = self.lend(&self.write, &self.read.lent_begin, Self::WRITE_RESERVE, n)?;
        Ok(WriteLease::new(self, lo, hi, token))
    }

    /// Leases all currently lendable capacity; the lease is empty when the
    /// buffer has none.
    pub fn prepare_all(&self) -> WriteLease<'_, T, N, S> {
        let (lo, hi, token) = self.lend_all(&self.write, &self.read.lent_begin, Self::WRITE_RESERVE);
        WriteLease::new(self, lo, hi, token)
    }

    /// Leases `n` published elements for in-place reading.
    ///
    /// Fails without side effects when `n` exceeds the published data.
    /// Dropping the returned lease retires the range to free capacity.
    pub fn read(&self, n: usize) -> Result<ReadLease<'_, T, N, S>, OutOfRange> {
        let (lo, hi, token) = self.lend(&self.read, &self.write.lent_begin, 0, n)?;
        Ok(ReadLease::new(self, lo, hi, token))
    }

    /// Leases all currently published data; the lease is empty when the
    /// buffer has none.
    pub fn read_all(&self) -> ReadLease<'_, T, N, S> {
        let (lo, hi, token) = self.lend_all(&self.read, &self.write.lent_begin, 0);
        ReadLease::new(self, lo, hi, token)
    }

    /// Waits until `n` slots of capacity are lendable, yielding to the
    /// executor between attempts.
    ///
    /// Dropping the future between attempts cancels the wait with no effect
    /// on the buffer.
    pub async fn prepare_async(&self, n: usize) -> WriteLease<'_, T, N, S> {
        loop {
            if let Ok(lease) = self.prepare(n) {
                return lease;
            }
            yield_now().await;
        }
    }

    /// Waits until `n` published elements are readable, yielding to the
    /// executor between attempts.
    ///
    /// Dropping the future between attempts cancels the wait with no effect
    /// on the buffer.
    pub async fn read_async(&self, n: usize) -> ReadLease<'_, T, N, S> {
        loop {
            if let Ok(lease) = self.read(n) {
                return lease;
            }
            yield_now().await;
        }
    }

    /// Acquire path shared by both managers.
    ///
    /// The lendable region runs from this side's `lendable_begin` (plus the
    /// write-side reserve slot) to the peer's `lent_begin`.
    fn lend(
        &self,
        side: &Side,
        peer_lent_begin: &AtomicUsize,
        reserve: usize,
        n: usize,
    ) -> Result<(usize, usize, LeaseToken), OutOfRange> {
        let mut registry = side
            .registry
            .lock()
            .expect("lease registry mutex poisoned");

        let begin = side.lendable_begin.load(Ordering::Relaxed);
        let end = peer_lent_begin.load(Ordering::Acquire);
        let available = distance::<N>((begin + reserve) % N, end);
        if n > available {
            return Err(OutOfRange {
                requested: n,
                available,
            });
        }

        let token = registry.push_back(begin);
        let hi = (begin + n) % N;
        side.lendable_begin.store(hi, Ordering::Release);
        Ok((begin, hi, token))
    }

    /// Infallible acquire of everything currently lendable.
    fn lend_all(
        &self,
        side: &Side,
        peer_lent_begin: &AtomicUsize,
        reserve: usize,
    ) -> (usize, usize, LeaseToken) {
        let mut registry = side
            .registry
            .lock()
            .expect("lease registry mutex poisoned");

        let begin = side.lendable_begin.load(Ordering::Relaxed);
        let end = peer_lent_begin.load(Ordering::Acquire);
        let n = distance::<N>((begin + reserve) % N, end);

        let token = registry.push_back(begin);
        let hi = (begin + n) % N;
        side.lendable_begin.store(hi, Ordering::Release);
        (begin, hi, token)
    }

    /// Release path shared by both managers.
    ///
    /// Removing the oldest lease advances `lent_begin` to the new oldest
    /// node, or to `lendable_begin` when the registry empties. That single
    /// store publishes (write side) or retires (read side) every write or
    /// read whose lease has already been released.
    fn release(&self, side: &Side, token: LeaseToken) {
        let mut registry = side
            .registry
            .lock()
            .expect("lease registry mutex poisoned");

        let was_front = registry.remove(token);
        if was_front {
            let new_begin = registry
                .front()
                .unwrap_or_else(|| side.lendable_begin.load(Ordering::Relaxed));
            side.lent_begin.store(new_begin, Ordering::Release);
        }
    }

    pub(crate) fn finish_write(&self, token: LeaseToken) {
        self.release(&self.write, token);
    }

    pub(crate) fn finish_read(&self, token: LeaseToken) {
        self.release(&self.read, token);
    }

    /// Raw pointer to slot `idx`.
    #[inline]
    pub(crate) fn slot_ptr(&self, idx: usize) -> *mut T {
        debug_assert!(idx < N);
        // SAFETY: the storage cell is alive for the duration of `&self` and
        // the Storage contract guarantees `N` contiguous slots.
        unsafe { S::base_ptr(self.storage.get()).add(idx) }
    }
}

impl<T, const N: usize, S: Storage<T>> Index<usize> for StreamBuffer<T, N, S> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        self.get(index).unwrap_or_else(|| {
            panic!(
                "index out of bounds: the len is {} but the index is {index}",
                self.len()
            )
        })
    }
}

impl<'a, T, const N: usize, S: Storage<T>> IntoIterator for &'a StreamBuffer<T, N, S> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T, N, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T, const N: usize, S> Clone for StreamBuffer<T, N, S>
where
    T: Clone,
    S: Storage<T> + Clone,
{
    /// Clones the storage and cursors.
    ///
    /// # Panics
    ///
    /// Panics if any lease is outstanding; a half-written or half-read clone
    /// would be silently corrupt.
    fn clone(&self) -> Self {
        // Lock order: read manager, then write manager.
        let read_registry = self
            .read
            .registry
            .lock()
            .expect("lease registry mutex poisoned");
        let write_registry = self
            .write
            .registry
            .lock()
            .expect("lease registry mutex poisoned");
        if !read_registry.is_empty() || !write_registry.is_empty() {
            // Unlock before panicking so the outstanding leases can still
            // release through these mutexes while the panic unwinds.
            drop(write_registry);
            drop(read_registry);
            panic!("cannot clone a stream buffer with outstanding leases");
        }

        // SAFETY: both managers are locked and no leases are outstanding, so
        // no slot is being written; shared access to the storage is safe.
        let storage = unsafe { &*self.storage.get() }.clone();
        Self {
            storage: UnsafeCell::new(storage),
            read: CachePadded::new(Side::with_cursors(
                self.read.lent_begin.load(Ordering::Relaxed),
                self.read.lendable_begin.load(Ordering::Relaxed),
            )),
            write: CachePadded::new(Side::with_cursors(
                self.write.lent_begin.load(Ordering::Relaxed),
                self.write.lendable_begin.load(Ordering::Relaxed),
            )),
            _elem: PhantomData,
        }
    }
}

impl<T, const N: usize, S: Storage<T>> fmt::Display for StreamBuffer<T, N, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self.read.lendable_begin.load(Ordering::Acquire);
        let stop = self.write.lent_begin.load(Ordering::Acquire);
        write!(
            f,
            "StreamBuffer {{ start = {start}, stop = {stop}, size = {} }}",
            distance::<N>(start, stop)
        )
    }
}

impl<T, const N: usize, S: Storage<T>> fmt::Debug for StreamBuffer<T, N, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBuffer")
            .field(
                "before_start",
                &self.read.lent_begin.load(Ordering::Relaxed),
            )
            .field("start", &self.read.lendable_begin.load(Ordering::Relaxed))
            .field("stop", &self.write.lent_begin.load(Ordering::Relaxed))
            .field(
                "after_stop",
                &self.write.lendable_begin.load(Ordering::Relaxed),
            )
            .field("len", &self.len())
            .finish()
    }
}

/// Yields to the executor for one scheduling quantum.
///
/// The future wakes itself before returning `Pending`, so the task is
/// immediately runnable again and the executor gets one chance to run other
/// tasks between lease-acquisition attempts.
fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}


#[cfg(all(test, loom))]
mod loom_tests {
    use super::StreamBuffer;

    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn concurrent_publish_and_retire_hand_off_in_order() {
        loom::model(|| {
            let buf = Arc::new(StreamBuffer::<u8, 4>::new());

            let producer = {
                let buf = Arc::clone(&buf);
                thread::spawn(move || {
                    for value in 0..2u8 {
                        loop {
                            match buf.prepare(1) {
                                Ok(mut w) => {
                                    w[0] = value;
                                    break;
                                }
                                Err(_) => thread::yield_now(),
                            }
                        }
                    }
                })
            };

            let mut seen = 0u8;
            while seen < 2 {
                match buf.read(1) {
                    Ok(r) => {
                        assert_eq!(r[0], seen);
                        seen += 1;
                    }
                    Err(_) => thread::yield_now(),
                }
            }

            producer.join().unwrap();
            assert!(buf.is_empty());
        });
    }
}
