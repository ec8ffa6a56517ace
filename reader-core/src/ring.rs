//! Fixed-capacity single-producer single-consumer ring buffer.
//!
//! The buffer is shared between exactly one writer and one reader that may
//! run at different interrupt priorities. Each side owns its own cursor and
//! the two meet only on the element count, so neither side ever takes a lock.
//!
//! # Example
//!
//! ```
//! use reader_core::RingBuffer;
//!
//! let mut ring: RingBuffer<u8, 4> = RingBuffer::new();
//! let (mut tx, mut rx) = ring.split();
//!
//! tx.put(b'A').unwrap();
//! assert_eq!(rx.get(), Some(b'A'));
//! assert_eq!(rx.get(), None);
//! ```

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use portable_atomic::{AtomicUsize, Ordering};

/// Bounded FIFO queue of `N` elements.
///
/// Use [`RingBuffer::put`] and [`RingBuffer::get`] when a single owner holds
/// the buffer, or [`RingBuffer::split`] to hand the two ends to different
/// execution contexts.
pub struct RingBuffer<T, const N: usize> {
    storage: [UnsafeCell<MaybeUninit<T>>; N],
    read: AtomicUsize,
    write: AtomicUsize,
    count: AtomicUsize,
}

// Slots are only touched by the side that owns the matching cursor, and the
// count hands them over with acquire/release ordering.
unsafe impl<T: Send, const N: usize> Sync for RingBuffer<T, N> {}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    const SLOT: UnsafeCell<MaybeUninit<T>> = UnsafeCell::new(MaybeUninit::uninit());

    /// Create an empty buffer.
    ///
    /// # Panics
    ///
    /// Panics (at compile time in const context) if `N` is zero.
    #[must_use]
    pub const fn new() -> Self {
        assert!(N > 0, "ring buffer capacity must be non-zero");
        Self {
            storage: [Self::SLOT; N],
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        }
    }

    /// Append an element.
    ///
    /// # Errors
    ///
    /// Hands the element back unchanged if the buffer is full.
    pub fn put(&mut self, value: T) -> Result<(), T> {
        // SAFETY: `&mut self` excludes any other producer.
        unsafe { self.enqueue(value) }
    }

    /// Remove the oldest element, or `None` if the buffer is empty.
    pub fn get(&mut self) -> Option<T> {
        // SAFETY: `&mut self` excludes any other consumer.
        unsafe { self.dequeue() }
    }

    /// Number of stored elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Whether no element is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `N` elements are stored.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Maximum number of elements.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Split into a producer and a consumer end.
    ///
    /// The exclusive borrow guarantees that at most one of each exists.
    pub fn split(&mut self) -> (Producer<'_, T, N>, Consumer<'_, T, N>) {
        let ring: &Self = self;
        (Producer { ring }, Consumer { ring })
    }

    /// # Safety
    ///
    /// Only one caller may be enqueueing at any time.
    unsafe fn enqueue(&self, value: T) -> Result<(), T> {
        if self.count.load(Ordering::Acquire) == N {
            return Err(value);
        }
        let write = self.write.load(Ordering::Relaxed);
        (*self.storage[write].get()).write(value);
        self.write.store(advance::<N>(write), Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// # Safety
    ///
    /// Only one caller may be dequeueing at any time.
    unsafe fn dequeue(&self) -> Option<T> {
        if self.count.load(Ordering::Acquire) == 0 {
            return None;
        }
        let read = self.read.load(Ordering::Relaxed);
        let value = (*self.storage[read].get()).assume_init_read();
        self.read.store(advance::<N>(read), Ordering::Relaxed);
        self.count.fetch_sub(1, Ordering::AcqRel);
        Some(value)
    }
}

impl<T: Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
const fn advance<const N: usize>(index: usize) -> usize {
    if index + 1 == N {
        0
    } else {
        index + 1
    }
}

/// Writing end of a split [`RingBuffer`].
pub struct Producer<'a, T, const N: usize> {
    ring: &'a RingBuffer<T, N>,
}

impl<T: Copy, const N: usize> Producer<'_, T, N> {
    /// Append an element, handing it back if the buffer is full.
    ///
    /// # Errors
    ///
    /// Returns the element unchanged when no slot is free.
    #[inline]
    pub fn put(&mut self, value: T) -> Result<(), T> {
        // SAFETY: the producer is unique per split and `&mut self` serializes it.
        unsafe { self.ring.enqueue(value) }
    }

    /// Whether the buffer is full.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    /// Number of stored elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether no element is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// Reading end of a split [`RingBuffer`].
pub struct Consumer<'a, T, const N: usize> {
    ring: &'a RingBuffer<T, N>,
}

impl<T: Copy, const N: usize> Consumer<'_, T, N> {
    /// Remove the oldest element, or `None` if the buffer is empty.
    #[inline]
    pub fn get(&mut self) -> Option<T> {
        // SAFETY: the consumer is unique per split and `&mut self` serializes it.
        unsafe { self.ring.dequeue() }
    }

    /// Whether no element is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Number of stored elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }
}
