//! Ordered registry of outstanding leases.
//!
//! Each manager half of the buffer tracks its open leases here, in acquire
//! order (which equals ring order by construction). The registry is a slab of
//! slots chained by `u32` index links with a free list, so a lease holds a
//! plain index token instead of a pointer into a list node:
//!
//! - `push_back` registers a lease's starting cursor in O(1);
//! - `remove` unregisters an arbitrary lease by token in O(1) and reports
//!   whether it was the oldest, which is the trigger for advancing the
//!   published (or retired) cursor;
//! - `front` exposes the oldest outstanding starting cursor.
//!
//! Slots are recycled through the free list; the slab only grows when more
//! leases are simultaneously outstanding than ever before.

// Compile-time: verify u32 fits in usize.
const _: () = assert!(
    std::mem::size_of::<usize>() >= std::mem::size_of::<u32>(),
    "Platform must have at least 32-bit addressing"
);

const NIL: u32 = u32::MAX;

/// Opaque handle to a registered lease.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LeaseToken(u32);

#[derive(Clone, Debug)]
struct Slot {
    /// Ring cursor recorded when the lease was handed out.
    value: usize,
    prev: u32,
    /// Next linked slot, or the next free slot while on the free list.
    next: u32,
    /// Distinguishes linked slots from free-list slots; tail slots have
    /// `next == NIL`, which would otherwise be indistinguishable from free.
    linked: bool,
}

/// Slab-backed ordered list of outstanding lease cursors.
#[derive(Clone, Debug)]
pub(crate) struct LeaseRegistry {
    slots: Vec<Slot>,
    head: u32,
    tail: u32,
    free: u32,
    len: u32,
}

impl LeaseRegistry {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            head: NIL,
            tail: NIL,
            free: NIL,
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        debug_assert!((self.len == 0) == (self.head == NIL));
        debug_assert!((self.len == 0) == (self.tail == NIL));
        self.len as usize
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cursor value of the oldest outstanding lease.
    #[inline]
    pub(crate) fn front(&self) -> Option<usize> {
        if self.head == NIL {
            None
        } else {
            Some(self.slots[self.head as usize].value)
        }
    }

    /// Registers `value` as the newest outstanding lease.
    ///
    /// # Panics
    ///
    /// Panics if the registry would exceed `u32::MAX - 1` entries.
    pub(crate) fn push_back(&mut self, value: usize) -> LeaseToken {
        assert!(self.len < NIL - 1, "lease registry overflow");

        let idx = self.alloc(value);
        match self.tail {
            NIL => {
                debug_assert!(self.head == NIL);
                self.head = idx;
            }
            tail => {
                debug_assert!(self.slots[tail as usize].next == NIL);
                self.slots[tail as usize].next = idx;
                self.slots[idx as usize].prev = tail;
            }
        }
        self.tail = idx;
        self.len += 1;

        LeaseToken(idx)
    }

    /// Unregisters the lease behind `token`.
    ///
    /// Returns `true` when the removed lease was the oldest, in which case
    /// the caller advances its published (or retired) cursor to the new
    /// [`front`](Self::front) value.
    ///
    /// # Panics
    ///
    /// Panics if `token` is not currently registered.
    pub(crate) fn remove(&mut self, token: LeaseToken) -> bool {
        let idx = token.0;
        let slot = &self.slots[idx as usize];
        assert!(slot.linked, "removing unregistered lease");

        let (prev, next) = (slot.prev, slot.next);
        let was_front = prev == NIL;
        debug_assert!(was_front == (self.head == idx));

        if was_front {
            self.head = next;
        } else {
            self.slots[prev as usize].next = next;
        }
        if next == NIL {
            debug_assert!(self.tail == idx);
            self.tail = prev;
        } else {
            self.slots[next as usize].prev = prev;
        }

        let slot = &mut self.slots[idx as usize];
        slot.linked = false;
        slot.prev = NIL;
        slot.next = self.free;
        self.free = idx;
        self.len -= 1;

        was_front
    }

    /// Takes a slot from the free list or grows the slab.
    fn alloc(&mut self, value: usize) -> u32 {
        match self.free {
            NIL => {
                let idx = self.slots.len() as u32;
                self.slots.push(Slot {
                    value,
                    prev: NIL,
                    next: NIL,
                    linked: true,
                });
                idx
            }
            idx => {
                let slot = &mut self.slots[idx as usize];
                debug_assert!(!slot.linked);
                self.free = slot.next;
                slot.value = value;
                slot.prev = NIL;
                slot.next = NIL;
                slot.linked = true;
                idx
            }
        }
    }
}
