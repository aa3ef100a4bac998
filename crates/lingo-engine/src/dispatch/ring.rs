//! Bounded ring buffer for context requests.
//!
//! Power-of-two capacity ring of stamped slots. Producers claim a sequence
//! with a single `fetch_add` and publish into the slot at
//! `sequence & (capacity - 1)`; slot stamps provide lap-based backpressure
//! when the ring is full. Consumers own deterministic sequence shards
//! (worker `k` of a pool of `P` takes exactly the sequences where
//! `sequence & (P - 1) == k`), so every published request is taken by
//! exactly one worker.
//!
//! Slots are flyweights: the `Option` cell is cleared when a request is
//! taken and the slot is restamped for the next lap, so steady-state
//! dispatch allocates nothing beyond the boxed continuation itself.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::wait::{Gate, WaitStrategy};
use super::Continuation;
use crate::error::DispatchError;

/// Default ring capacity.
pub const DEFAULT_RING_CAPACITY: usize = 2048;

struct Slot {
    /// Lap stamp: `seq` means free for the producer claiming `seq`,
    /// `seq + 1` means published, `seq + capacity` means consumed and free
    /// for the next lap.
    stamp: AtomicU64,
    cell: UnsafeCell<Option<Continuation>>,
}

/// Bounded, power-of-two ring of context request slots.
pub struct RingBuffer {
    slots: Box<[Slot]>,
    mask: u64,
    next_seq: AtomicU64,
    strategy: WaitStrategy,
    publish_gate: Gate,
    free_gate: Gate,
    closed: AtomicBool,
}

// Slot cells are accessed exclusively: a producer touches a cell only while
// the stamp equals its claimed sequence, a consumer only while the stamp
// equals sequence + 1, and the stamp transitions hand off visibility with
// acquire/release ordering.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create a ring with the given capacity and wait strategy.
    pub fn with_capacity(capacity: usize, strategy: WaitStrategy) -> Result<Self, DispatchError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(DispatchError::RingCapacityNotPowerOfTwo(capacity));
        }

        let slots = (0..capacity)
            .map(|index| Slot {
                stamp: AtomicU64::new(index as u64),
                cell: UnsafeCell::new(None),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            slots,
            mask: (capacity - 1) as u64,
            next_seq: AtomicU64::new(0),
            strategy,
            publish_gate: Gate::new(),
            free_gate: Gate::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Ring capacity in slots.
    pub fn capacity(&self) -> usize {
        (self.mask + 1) as usize
    }

    /// Whether the ring has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Claim the next sequence and publish a continuation into its slot.
    ///
    /// Blocks per the wait strategy while the ring is full. Returns the
    /// published sequence number.
    pub fn publish(&self, continuation: Continuation) -> Result<u64, DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::ShuttingDown);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let slot = &self.slots[(seq & self.mask) as usize];

        let mut attempts = 0;
        while slot.stamp.load(Ordering::Acquire) != seq {
            if self.is_closed() {
                return Err(DispatchError::ShuttingDown);
            }
            self.strategy.idle(&mut attempts, &self.free_gate);
        }

        // The stamp matched our claimed sequence: this producer has the slot
        // to itself until the release store below.
        unsafe {
            *slot.cell.get() = Some(continuation);
        }
        slot.stamp.store(seq + 1, Ordering::Release);
        self.publish_gate.notify_all();
        Ok(seq)
    }

    /// Take the continuation published at `seq`, waiting until it appears.
    ///
    /// Returns `None` once the ring is closed and `seq` will never be
    /// published; already-published sequences are still drained.
    pub fn take(&self, seq: u64) -> Option<Continuation> {
        let slot = &self.slots[(seq & self.mask) as usize];

        let mut attempts = 0;
        loop {
            if slot.stamp.load(Ordering::Acquire) == seq + 1 {
                // Published and unconsumed; the sharding rule gives this
                // sequence exactly one consumer.
                let continuation = unsafe { (*slot.cell.get()).take() };
                debug_assert!(continuation.is_some());
                slot.stamp.store(seq + self.capacity() as u64, Ordering::Release);
                self.free_gate.notify_all();
                return continuation;
            }
            if self.is_closed() {
                return None;
            }
            self.strategy.idle(&mut attempts, &self.publish_gate);
        }
    }

    /// Close the ring: rejects further publishes and wakes all waiters.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.publish_gate.notify_all();
        self.free_gate.notify_all();
    }
}
