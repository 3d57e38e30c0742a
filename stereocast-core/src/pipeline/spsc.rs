//! Wait-free single-producer/single-consumer rings for frame handoff.
//!
//! Two variants share the same layout discipline (head and tail in
//! separate cache lines, storage in-place, no allocation after
//! construction):
//!
//! - [`SpscRing`]: move items through the ring (`try_push` / `try_pop`).
//! - [`SlotRing`]: write large items in place (`begin_write` /
//!   `commit_write`) to avoid an intermediate move.
//!
//! # Contract
//!
//! Exactly one thread may call the producer-side methods and exactly one
//! thread the consumer-side methods at any time. The types are `Sync` so
//! both halves can be reached through a shared `Arc`; upholding the
//! single-producer/single-consumer discipline is the caller's
//! responsibility.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

// ── SpscRing ─────────────────────────────────────────────────────

/// Bounded wait-free SPSC ring over a power-of-two capacity.
///
/// One slot is kept free to distinguish full from empty, so a ring of
/// capacity `N` holds at most `N - 1` items.
pub struct SpscRing<T> {
    /// Consumer index. Written by the consumer with Release.
    head: CachePadded<AtomicUsize>,
    /// Producer index. Written by the producer with Release.
    tail: CachePadded<AtomicUsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// Create a ring with `capacity` slots. `capacity` must be a power
    /// of two and at least 2.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity >= 2,
            "capacity must be a power of two >= 2"
        );
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            slots,
            mask: capacity - 1,
        }
    }

    /// Push an item (producer only). Returns the item back if the ring
    /// is full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & self.mask;

        if next == self.head.load(Ordering::Acquire) {
            return Err(item); // full
        }

        unsafe {
            (*self.slots[tail].get()).write(item);
        }
        self.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Pop an item (consumer only). Returns `None` if the ring is empty.
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);

        if head == self.tail.load(Ordering::Acquire) {
            return None; // empty
        }

        let item = unsafe { (*self.slots[head].get()).assume_init_read() };
        self.head.store((head + 1) & self.mask, Ordering::Release);
        Some(item)
    }

    /// Peek at the front item without removing it (consumer only).
    ///
    /// The reference is valid until the consumer's next `try_pop` or
    /// `clear`.
    pub fn peek(&self) -> Option<&T> {
        let head = self.head.load(Ordering::Relaxed);

        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }

        Some(unsafe { (*self.slots[head].get()).assume_init_ref() })
    }

    /// Whether the ring currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Whether a push would currently fail.
    pub fn is_full(&self) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & self.mask;
        next == self.head.load(Ordering::Acquire)
    }

    /// Approximate number of queued items. May be stale by the time the
    /// caller uses it.
    pub fn size_approx(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        tail.wrapping_sub(head) & self.mask
    }

    /// Drop all queued items (consumer only).
    pub fn clear(&self) {
        while self.try_pop().is_some() {}
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        // Sole owner at this point; drain whatever is still queued.
        while self.try_pop().is_some() {}
    }
}

// ── SlotRing ─────────────────────────────────────────────────────

struct Slot<T> {
    value: UnsafeCell<T>,
    ready: AtomicBool,
}

/// SPSC ring for large items, written in place.
///
/// The producer obtains a slot with [`begin_write`](Self::begin_write),
/// fills it, then publishes with [`commit_write`](Self::commit_write).
/// The consumer reads through [`peek_read`](Self::peek_read) and retires
/// the slot with [`complete_read`](Self::complete_read). Each slot's
/// `ready` flag is advanced with Release so the consumer never observes
/// a partially written item.
pub struct SlotRing<T> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    slots: Box<[Slot<T>]>,
    mask: usize,
    write_in_progress: AtomicBool,
}

unsafe impl<T: Send> Send for SlotRing<T> {}
unsafe impl<T: Send> Sync for SlotRing<T> {}

impl<T: Default> SlotRing<T> {
    /// Create a ring with `capacity` default-initialized slots.
    /// `capacity` must be a power of two and at least 2.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity >= 2,
            "capacity must be a power of two >= 2"
        );
        let slots = (0..capacity)
            .map(|_| Slot {
                value: UnsafeCell::new(T::default()),
                ready: AtomicBool::new(false),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            slots,
            mask: capacity - 1,
            write_in_progress: AtomicBool::new(false),
        }
    }

    /// Obtain the next slot for writing (producer only). Returns `None`
    /// if the ring is full or a write is already open.
    #[allow(clippy::mut_from_ref)]
    pub fn begin_write(&self) -> Option<&mut T> {
        if self.write_in_progress.load(Ordering::Relaxed) {
            return None;
        }

        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & self.mask;

        if next == self.head.load(Ordering::Acquire) {
            return None;
        }

        self.write_in_progress.store(true, Ordering::Relaxed);
        Some(unsafe { &mut *self.slots[tail].value.get() })
    }

    /// Publish the slot obtained from `begin_write` (producer only).
    pub fn commit_write(&self) {
        if !self.write_in_progress.load(Ordering::Relaxed) {
            return;
        }

        let tail = self.tail.load(Ordering::Relaxed);
        self.slots[tail].ready.store(true, Ordering::Release);
        self.tail.store((tail + 1) & self.mask, Ordering::Release);
        self.write_in_progress.store(false, Ordering::Relaxed);
    }

    /// Read the front item without retiring it (consumer only).
    pub fn peek_read(&self) -> Option<&T> {
        let head = self.head.load(Ordering::Relaxed);

        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        if !self.slots[head].ready.load(Ordering::Acquire) {
            return None;
        }

        Some(unsafe { &*self.slots[head].value.get() })
    }

    /// Retire the front item (consumer only).
    pub fn complete_read(&self) {
        let head = self.head.load(Ordering::Relaxed);
        self.slots[head].ready.store(false, Ordering::Relaxed);
        self.head.store((head + 1) & self.mask, Ordering::Release);
    }

    /// Whether the ring currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn push_pop_single_item() {
        let ring = SpscRing::new(4);
        assert!(ring.is_empty());
        ring.try_push(42u32).unwrap();
        assert_eq!(ring.size_approx(), 1);
        assert_eq!(ring.peek(), Some(&42));
        assert_eq!(ring.try_pop(), Some(42));
        assert!(ring.is_empty());
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn full_at_capacity_minus_one() {
        let ring = SpscRing::new(4);
        for i in 0..3u32 {
            ring.try_push(i).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.size_approx(), 3);
        assert_eq!(ring.try_push(99), Err(99));
    }

    #[test]
    fn capacity_two_alternation() {
        let ring = SpscRing::new(2);
        for i in 0..10_000u64 {
            ring.try_push(i).unwrap();
            assert!(ring.is_full());
            assert_eq!(ring.try_pop(), Some(i));
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn clear_drops_items() {
        let ring = SpscRing::new(8);
        for i in 0..5 {
            ring.try_push(Arc::new(i)).unwrap();
        }
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.size_approx(), 0);
    }

    #[test]
    fn drop_releases_queued_items() {
        let marker = Arc::new(());
        {
            let ring = SpscRing::new(8);
            ring.try_push(Arc::clone(&marker)).unwrap();
            ring.try_push(Arc::clone(&marker)).unwrap();
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn two_thread_transfer_preserves_every_item() {
        const COUNT: u64 = 100_000;
        let ring = Arc::new(SpscRing::new(64));

        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut next = 0u64;
                while next < COUNT {
                    if ring.try_push(next).is_ok() {
                        next += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            })
        };

        let consumer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut expected = 0u64;
                let mut sum = 0u64;
                while expected < COUNT {
                    match ring.try_pop() {
                        Some(v) => {
                            // FIFO order, nothing duplicated or skipped.
                            assert_eq!(v, expected);
                            sum += v;
                            expected += 1;
                        }
                        None => std::hint::spin_loop(),
                    }
                }
                sum
            })
        };

        producer.join().unwrap();
        let sum = consumer.join().unwrap();
        assert_eq!(sum, COUNT * (COUNT - 1) / 2);
        assert!(ring.is_empty());
    }

    #[test]
    fn slot_ring_write_read_cycle() {
        let ring: SlotRing<Vec<u8>> = SlotRing::new(4);
        assert!(ring.peek_read().is_none());

        {
            let slot = ring.begin_write().unwrap();
            slot.clear();
            slot.extend_from_slice(&[1, 2, 3]);
        }
        // Not visible until committed.
        assert!(ring.peek_read().is_none());
        ring.commit_write();

        assert_eq!(ring.peek_read().unwrap().as_slice(), &[1, 2, 3]);
        ring.complete_read();
        assert!(ring.is_empty());
    }

    #[test]
    fn slot_ring_rejects_nested_write() {
        let ring: SlotRing<u64> = SlotRing::new(4);
        let slot = ring.begin_write().unwrap();
        *slot = 7;
        assert!(ring.begin_write().is_none());
        ring.commit_write();
        assert!(ring.begin_write().is_some());
    }

    #[test]
    fn slot_ring_full_when_uncommitted_slots_wrap() {
        let ring: SlotRing<u64> = SlotRing::new(2);
        *ring.begin_write().unwrap() = 1;
        ring.commit_write();
        // One slot reserved: the second write must fail until a read.
        assert!(ring.begin_write().is_none());
        ring.complete_read();
        assert!(ring.begin_write().is_some());
    }
}
