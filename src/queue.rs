//! Bounded lock-free MPMC queue
//!
//! Slotted sequence-tag design: every slot carries a monotonically increasing
//! sequence number that encodes whether the slot is free for the producer at
//! the current position or holds a value for the consumer. Full and empty are
//! distinguished without a separate length field, and the uncontended fast
//! path is a single CAS plus one release store.
//!
//! Position counters live on their own cache lines so producers and consumers
//! do not false-share.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity multi-producer multi-consumer queue.
///
/// Capacity is rounded up to a power of two so index arithmetic reduces to a
/// mask. `push` and `pop` never block, never allocate, and never make
/// syscalls.
pub struct BoundedQueue<T> {
    slots: Box<[CachePadded<Slot<T>>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at least `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity)
            .map(|i| {
                CachePadded::new(Slot {
                    sequence: AtomicUsize::new(i),
                    value: UnsafeCell::new(MaybeUninit::uninit()),
                })
            })
            .collect();
        Self {
            slots,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// True when no published value is waiting to be popped.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.enqueue_pos.load(Ordering::Acquire) == self.dequeue_pos.load(Ordering::Acquire)
    }

    /// Attempt to enqueue. Returns the value back when the queue is full.
    pub fn push(&self, value: T) -> std::result::Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // slot still holds a value from one lap behind: full
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempt to dequeue. Returns `None` when the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos.wrapping_add(1) as isize;
            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.capacity()), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        // drain remaining values so their destructors run
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_rounds_up() {
        assert_eq!(BoundedQueue::<u32>::with_capacity(0).capacity(), 1);
        assert_eq!(BoundedQueue::<u32>::with_capacity(5).capacity(), 8);
        assert_eq!(BoundedQueue::<u32>::with_capacity(1024).capacity(), 1024);
    }

    #[test]
    fn test_push_pop_fifo() {
        let queue = BoundedQueue::with_capacity(8);
        for i in 0..8 {
            assert!(queue.push(i).is_ok());
        }
        for i in 0..8 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_returns_value() {
        let queue = BoundedQueue::with_capacity(2);
        assert!(queue.push("a").is_ok());
        assert!(queue.push("b").is_ok());
        assert_eq!(queue.push("c"), Err("c"));

        assert_eq!(queue.pop(), Some("a"));
        assert!(queue.push("c").is_ok());
    }

    #[test]
    fn test_wraparound() {
        let queue = BoundedQueue::with_capacity(4);
        for lap in 0..100 {
            for i in 0..4 {
                assert!(queue.push(lap * 4 + i).is_ok());
            }
            for i in 0..4 {
                assert_eq!(queue.pop(), Some(lap * 4 + i));
            }
        }
    }

    #[test]
    fn test_single_producer_order_preserved() {
        let queue = Arc::new(BoundedQueue::with_capacity(64));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..10_000u64 {
                    while queue.push(i).is_err() {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut expected = 0u64;
        while expected < 10_000 {
            if let Some(v) = queue.pop() {
                assert_eq!(v, expected);
                expected += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_mpmc_no_loss_no_dup() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 20_000;

        let queue = Arc::new(BoundedQueue::with_capacity(128));
        let mut handles = Vec::new();

        for p in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let value = p * PER_PRODUCER + i;
                    while queue.push(value).is_err() {
                        thread::yield_now();
                    }
                }
            }));
        }

        let total = PRODUCERS * PER_PRODUCER;
        let seen = Arc::new(std::sync::Mutex::new(vec![false; total as usize]));
        let popped = Arc::new(AtomicUsize::new(0));
        let mut consumers = Vec::new();
        for _ in 0..2 {
            let queue = Arc::clone(&queue);
            let seen = Arc::clone(&seen);
            let popped = Arc::clone(&popped);
            consumers.push(thread::spawn(move || {
                while popped.load(Ordering::Relaxed) < total as usize {
                    if let Some(v) = queue.pop() {
                        let mut seen = seen.lock().unwrap();
                        assert!(!seen[v as usize], "duplicate value {}", v);
                        seen[v as usize] = true;
                        popped.fetch_add(1, Ordering::Relaxed);
                    } else {
                        thread::yield_now();
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        for handle in consumers {
            handle.join().unwrap();
        }
        assert!(seen.lock().unwrap().iter().all(|&s| s), "missing values");
    }

    #[test]
    fn test_drop_drains_values() {
        let counter = Arc::new(AtomicUsize::new(0));

        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let queue = BoundedQueue::with_capacity(8);
        for _ in 0..5 {
            assert!(queue.push(Counted(Arc::clone(&counter))).is_ok());
        }
        drop(queue);
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }
}
