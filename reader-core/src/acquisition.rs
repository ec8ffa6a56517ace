//! Card frame acquisition buffer.
//!
//! The reader latches one [`Sample`] per card column on every strobe and
//! signals the end of a card with a separate edge. Frames are collected in a
//! small ring of slots: the edge handlers fill `slots[write_slot]`, the main
//! loop copies `slots[read_slot]` out. The two never share a slot.
//!
//! When every free slot is taken the buffer enters a sticky overrun state.
//! Nothing more is handed out until [`FrameConsumer::reset`].

use core::cell::UnsafeCell;
use portable_atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

/// One latched data bus value (12 data lines, a punched hole reads as `1`).
pub type Sample = u16;

/// Default number of frame slots.
pub const DEFAULT_SLOTS: usize = 4;

/// Default number of samples per frame (one per card column, plus margin).
pub const MAX_POSITIONS: usize = 82;

/// Error returned when taking a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AcquisitionError {
    /// Frames arrived faster than they were taken. Cleared by a reset.
    Overrun,
}

impl core::fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Overrun => write!(f, "frame buffer overrun"),
        }
    }
}

/// Outcome of a frame-complete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameCompletion {
    /// Card feeding must stop (single-card mode).
    pub pause: bool,
    /// The frame could not be committed.
    pub overrun: bool,
}

/// Point-in-time view of the acquisition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcquisitionStatus {
    pub overrun: bool,
    pub continuous: bool,
    /// Frame-complete events since the last reset or count clear.
    pub frames_completed: u32,
    /// Samples discarded because a frame exceeded its slot.
    pub samples_dropped: u32,
    /// Committed frames not taken yet.
    pub pending: usize,
}

struct Slot<const M: usize> {
    samples: [Sample; M],
    len: usize,
}

/// Ring of `R` frame slots holding up to `M` samples each.
pub struct FrameBuffer<const R: usize = DEFAULT_SLOTS, const M: usize = MAX_POSITIONS> {
    slots: [UnsafeCell<Slot<M>>; R],
    write_slot: AtomicUsize,
    read_slot: AtomicUsize,
    overrun: AtomicBool,
    continuous: AtomicBool,
    frames_completed: AtomicU32,
    samples_dropped: AtomicU32,
}

// Producer operations run inside a critical section and only touch
// `slots[write_slot]`; the consumer only touches `slots[read_slot]`, which
// the producer never enters while the two indices differ.
unsafe impl<const R: usize, const M: usize> Sync for FrameBuffer<R, M> {}

impl<const R: usize, const M: usize> FrameBuffer<R, M> {
    const EMPTY: UnsafeCell<Slot<M>> = UnsafeCell::new(Slot {
        samples: [0; M],
        len: 0,
    });

    /// Create an empty buffer.
    ///
    /// # Panics
    ///
    /// Panics if `R < 2` or `M == 0`.
    #[must_use]
    pub const fn new() -> Self {
        assert!(R >= 2, "frame buffer needs at least two slots");
        assert!(M > 0, "frame slots must hold at least one sample");
        Self {
            slots: [Self::EMPTY; R],
            write_slot: AtomicUsize::new(0),
            read_slot: AtomicUsize::new(0),
            overrun: AtomicBool::new(false),
            continuous: AtomicBool::new(false),
            frames_completed: AtomicU32::new(0),
            samples_dropped: AtomicU32::new(0),
        }
    }

    /// Split into the handler side and the main-loop side.
    pub fn split(&mut self) -> (FrameProducer<'_, R, M>, FrameConsumer<'_, R, M>) {
        let frames: &Self = self;
        (FrameProducer { frames }, FrameConsumer { frames })
    }

    fn status(&self) -> AcquisitionStatus {
        let write = self.write_slot.load(Ordering::Acquire);
        let read = self.read_slot.load(Ordering::Acquire);
        AcquisitionStatus {
            overrun: self.overrun.load(Ordering::Acquire),
            continuous: self.continuous.load(Ordering::Acquire),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            pending: (write + R - read) % R,
        }
    }
}

impl<const R: usize, const M: usize> Default for FrameBuffer<R, M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler side of a [`FrameBuffer`].
///
/// Copies may be handed to several edge handlers; each operation runs in its
/// own critical section.
#[derive(Clone, Copy)]
pub struct FrameProducer<'a, const R: usize, const M: usize> {
    frames: &'a FrameBuffer<R, M>,
}

impl<const R: usize, const M: usize> FrameProducer<'_, R, M> {
    /// Append a sample to the frame in progress.
    ///
    /// Returns `false` if the frame is already full and the sample was dropped.
    pub fn on_sample(&self, sample: Sample) -> bool {
        let frames = self.frames;
        critical_section::with(|_| {
            let write = frames.write_slot.load(Ordering::Relaxed);
            // SAFETY: the consumer never reads the write slot and producers are
            // serialized by the critical section.
            let slot = unsafe { &mut *frames.slots[write].get() };
            if slot.len < M {
                slot.samples[slot.len] = sample;
                slot.len += 1;
                true
            } else {
                let dropped = frames.samples_dropped.load(Ordering::Relaxed);
                frames
                    .samples_dropped
                    .store(dropped.wrapping_add(1), Ordering::Relaxed);
                false
            }
        })
    }

    /// Commit the frame in progress.
    ///
    /// If the next slot is still unread the frame is discarded and the
    /// buffer enters overrun; otherwise the write slot advances.
    pub fn on_frame_complete(&self) -> FrameCompletion {
        let frames = self.frames;
        critical_section::with(|_| {
            let continuous = frames.continuous.load(Ordering::Relaxed);
            let write = frames.write_slot.load(Ordering::Relaxed);
            let read = frames.read_slot.load(Ordering::Acquire);

            let overrun = write == (read + R - 1) % R;
            if overrun {
                frames.overrun.store(true, Ordering::Release);
                // SAFETY: the write slot is producer-owned.
                unsafe { (*frames.slots[write].get()).len = 0 };
            } else {
                let next = (write + 1) % R;
                // SAFETY: `next != read`, so the consumer is not using it.
                unsafe { (*frames.slots[next].get()).len = 0 };
                frames.write_slot.store(next, Ordering::Release);
            }

            let completed = frames.frames_completed.load(Ordering::Relaxed);
            frames
                .frames_completed
                .store(completed.wrapping_add(1), Ordering::Relaxed);

            FrameCompletion {
                pause: !continuous,
                overrun,
            }
        })
    }

    /// Hopper ran dry: stop continuous feeding.
    pub fn on_hopper_check(&self) {
        self.frames.continuous.store(false, Ordering::Release);
    }

    /// Snapshot of the counters.
    pub fn status(&self) -> AcquisitionStatus {
        self.frames.status()
    }
}

/// Main-loop side of a [`FrameBuffer`].
pub struct FrameConsumer<'a, const R: usize, const M: usize> {
    frames: &'a FrameBuffer<R, M>,
}

impl<const R: usize, const M: usize> FrameConsumer<'_, R, M> {
    /// Copy the oldest committed frame into `out`.
    ///
    /// Returns the number of samples copied, or `None` if no frame is ready.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::Overrun`] without consuming anything while
    /// the buffer is in overrun.
    pub fn try_take(&mut self, out: &mut [Sample; M]) -> Result<Option<usize>, AcquisitionError> {
        let frames = self.frames;
        if frames.overrun.load(Ordering::Acquire) {
            return Err(AcquisitionError::Overrun);
        }

        let read = frames.read_slot.load(Ordering::Relaxed);
        if read == frames.write_slot.load(Ordering::Acquire) {
            return Ok(None);
        }

        // SAFETY: the slot was committed by the producer (write moved past it)
        // and stays out of its reach until `read_slot` advances.
        let slot = unsafe { &*frames.slots[read].get() };
        let len = slot.len;
        out[..len].copy_from_slice(&slot.samples[..len]);

        frames.read_slot.store((read + 1) % R, Ordering::Release);
        Ok(Some(len))
    }

    /// Return to the power-on state.
    ///
    /// Cursors, slot lengths, overrun, continuous mode and counters are all
    /// cleared in one critical section.
    pub fn reset(&mut self) {
        let frames = self.frames;
        critical_section::with(|_| {
            for slot in &frames.slots {
                // SAFETY: handlers are excluded by the critical section and the
                // consumer is `self`.
                unsafe { (*slot.get()).len = 0 };
            }
            frames.write_slot.store(0, Ordering::Release);
            frames.read_slot.store(0, Ordering::Release);
            frames.overrun.store(false, Ordering::Release);
            frames.continuous.store(false, Ordering::Release);
            frames.frames_completed.store(0, Ordering::Relaxed);
            frames.samples_dropped.store(0, Ordering::Relaxed);
        });
    }

    /// Enable or disable continuous feeding.
    pub fn set_continuous(&mut self, continuous: bool) {
        self.frames.continuous.store(continuous, Ordering::Release);
    }

    /// Restart the completed-frame counter.
    pub fn clear_frame_count(&mut self) {
        self.frames.frames_completed.store(0, Ordering::Relaxed);
    }

    /// Committed frames waiting to be taken.
    pub fn pending(&self) -> usize {
        self.frames.status().pending
    }

    /// Snapshot of the counters.
    pub fn status(&self) -> AcquisitionStatus {
        self.frames.status()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn test_take_single_frame() {
        let mut frames: FrameBuffer<2, 3> = FrameBuffer::new();
        let (producer, mut consumer) = frames.split();
        let mut out = [0; 3];

        assert!(producer.on_sample(10));
        assert!(producer.on_sample(20));
        let done = producer.on_frame_complete();
        assert!(!done.overrun);
        assert!(done.pause);

        assert_eq!(consumer.try_take(&mut out), Ok(Some(2)));
        assert_eq!(&out[..2], &[10, 20]);
        assert_eq!(consumer.frames.read_slot.load(Ordering::Relaxed), 1);
        assert_eq!(consumer.try_take(&mut out), Ok(None));
    }

    #[test]
    fn test_empty_buffer_yields_nothing() {
        let mut frames: FrameBuffer = FrameBuffer::new();
        let (_producer, mut consumer) = frames.split();
        let mut out = [0; MAX_POSITIONS];

        assert_eq!(consumer.try_take(&mut out), Ok(None));
        assert_eq!(consumer.pending(), 0);
    }

    #[test]
    fn test_overrun_on_fourth_untaken_frame() {
        let mut frames: FrameBuffer<4, 8> = FrameBuffer::new();
        let (producer, mut consumer) = frames.split();
        let mut out = [0; 8];

        for card in 0..3u16 {
            producer.on_sample(card);
            assert!(!producer.on_frame_complete().overrun);
        }
        assert_eq!(consumer.pending(), 3);

        producer.on_sample(99);
        assert!(producer.on_frame_complete().overrun);
        assert_eq!(consumer.try_take(&mut out), Err(AcquisitionError::Overrun));
        assert_eq!(consumer.try_take(&mut out), Err(AcquisitionError::Overrun));

        let status = consumer.status();
        assert!(status.overrun);
        assert_eq!(status.frames_completed, 4);

        consumer.reset();
        assert_eq!(consumer.try_take(&mut out), Ok(None));
        assert_eq!(consumer.status(), AcquisitionStatus::default());
    }

    #[test]
    fn test_frames_taken_in_order_across_wrap() {
        let mut frames: FrameBuffer<3, 4> = FrameBuffer::new();
        let (producer, mut consumer) = frames.split();
        let mut out = [0; 4];

        for card in 1..=7u16 {
            producer.on_sample(card);
            producer.on_sample(card * 100);
            assert!(!producer.on_frame_complete().overrun);
            assert_eq!(consumer.try_take(&mut out), Ok(Some(2)));
            assert_eq!(&out[..2], &[card, card * 100]);
        }
    }

    #[test]
    fn test_overflowing_samples_are_dropped() {
        let mut frames: FrameBuffer<2, 3> = FrameBuffer::new();
        let (producer, mut consumer) = frames.split();
        let mut out = [0; 3];

        for sample in 1..=5 {
            producer.on_sample(sample);
        }
        producer.on_frame_complete();

        assert_eq!(consumer.try_take(&mut out), Ok(Some(3)));
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(consumer.status().samples_dropped, 2);
    }

    #[test]
    fn test_overrun_discards_frame_in_progress() {
        let mut frames: FrameBuffer<2, 4> = FrameBuffer::new();
        let (producer, mut consumer) = frames.split();

        producer.on_sample(1);
        producer.on_frame_complete();
        producer.on_sample(2);
        assert!(producer.on_frame_complete().overrun);

        // write slot was cleared, so the next card starts from scratch
        producer.on_sample(3);
        // SAFETY: no handler runs concurrently in this test.
        let slot = unsafe { &*consumer.frames.slots[1].get() };
        assert_eq!(&slot.samples[..slot.len], &[3]);

        consumer.reset();
        assert_eq!(consumer.pending(), 0);
    }

    #[test]
    fn test_continuous_mode_keeps_feeding() {
        let mut frames: FrameBuffer<4, 2> = FrameBuffer::new();
        let (producer, mut consumer) = frames.split();

        consumer.set_continuous(true);
        assert!(!producer.on_frame_complete().pause);

        producer.on_hopper_check();
        assert!(!consumer.status().continuous);
        assert!(producer.on_frame_complete().pause);
    }

    #[test]
    fn test_clear_frame_count() {
        let mut frames: FrameBuffer<4, 2> = FrameBuffer::new();
        let (producer, mut consumer) = frames.split();

        producer.on_frame_complete();
        producer.on_frame_complete();
        assert_eq!(producer.status().frames_completed, 2);

        consumer.clear_frame_count();
        assert_eq!(consumer.status().frames_completed, 0);
        assert_eq!(consumer.pending(), 2);
    }
}
