//! Reader-side GPIO: data bus, edge handlers and status lines.
//!
//! The edge handlers run on the high-priority executor and only call into
//! the handler side of the shared components. See [`crate::config`] for the
//! pin map.

use core::cell::RefCell;
use defmt::{info, trace, warn};
use embassy_rp::pac;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::digital::Wait;
use portable_atomic::{AtomicBool, Ordering};
use reader_core::{FrameProducer, LineLevels, PickControl, Sample, StatusInputs};

use crate::config::{DATA_LINES, DATA_MASK};

/// The reader's twelve active-low data lines.
///
/// The pins are held only to keep them configured as inputs; the bus is
/// latched through the SIO input register so all lines are sampled on the
/// same clock edge.
pub struct DataBus<I> {
    _lines: [I; DATA_LINES],
}

impl<I> DataBus<I> {
    /// Wrap the data lines, D0 (GP0) first.
    pub fn new(lines: [I; DATA_LINES]) -> Self {
        Self { _lines: lines }
    }

    /// Latch the bus. A line pulled low reads as `1`.
    pub fn read(&mut self) -> Sample {
        let port = pac::SIO.gpio_in(0).read();
        to_sample(port)
    }
}

/// Invert and mask a GPIO input snapshot down to D0-D11.
const fn to_sample(port: u32) -> Sample {
    (!port & DATA_MASK) as Sample
}

/// Data bus shared by the strobe handler and the status line.
pub type SharedBus<I> = Mutex<CriticalSectionRawMutex, RefCell<DataBus<I>>>;

fn read_bus<I: InputPin>(bus: &SharedBus<I>) -> Sample {
    bus.lock(|bus| bus.borrow_mut().read())
}

/// Latch one column on every falling edge of the strobe line.
pub async fn watch_strobe<S, I, const R: usize, const M: usize>(
    strobe: &mut S,
    bus: &SharedBus<I>,
    frames: FrameProducer<'_, R, M>,
) -> !
where
    S: Wait,
    I: InputPin,
{
    loop {
        if strobe.wait_for_falling_edge().await.is_err() {
            continue;
        }
        if !frames.on_sample(read_bus(bus)) {
            trace!("column beyond {} dropped", M);
        }
    }
}

/// Commit the frame on every rising edge of the busy line.
pub async fn watch_busy<B, P, const R: usize, const M: usize>(
    busy: &mut B,
    frames: FrameProducer<'_, R, M>,
    pick: &PickControl<P>,
) -> !
where
    B: Wait,
    P: OutputPin,
{
    loop {
        if busy.wait_for_rising_edge().await.is_err() {
            continue;
        }
        let done = frames.on_frame_complete();
        if done.pause {
            let _ = pick.pause();
        }
        if done.overrun {
            warn!("frame buffer overrun, host must send R");
        } else {
            trace!("card complete ({} pending)", frames.status().pending);
        }
    }
}

/// Track the hopper-check line and stop feeding when it falls.
pub async fn watch_hopper<H, P, const R: usize, const M: usize>(
    hopper: &mut H,
    level: &AtomicBool,
    frames: FrameProducer<'_, R, M>,
    pick: &PickControl<P>,
) -> !
where
    H: Wait + InputPin,
    P: OutputPin,
{
    level.store(hopper.is_high().unwrap_or(true), Ordering::Release);
    loop {
        if hopper.wait_for_any_edge().await.is_err() {
            continue;
        }
        let high = hopper.is_high().unwrap_or(true);
        level.store(high, Ordering::Release);
        if !high {
            frames.on_hopper_check();
            let _ = pick.pause();
            info!("hopper empty, feeding stopped");
        }
    }
}

/// Reader status lines sampled for the `CTRL:` line.
pub struct BoardStatus<'a, I> {
    bus: &'a SharedBus<I>,
    hopper: &'a AtomicBool,
    motion: I,
    error: I,
    ready: I,
}

impl<'a, I: InputPin> BoardStatus<'a, I> {
    pub fn new(bus: &'a SharedBus<I>, hopper: &'a AtomicBool, motion: I, error: I, ready: I) -> Self {
        Self {
            bus,
            hopper,
            motion,
            error,
            ready,
        }
    }
}

impl<I: InputPin> StatusInputs for BoardStatus<'_, I> {
    fn levels(&mut self) -> LineLevels {
        LineLevels {
            hopper_check: self.hopper.load(Ordering::Acquire),
            motion_check: self.motion.is_high().unwrap_or(false),
            error: self.error.is_high().unwrap_or(false),
            ready: self.ready.is_high().unwrap_or(false),
            data: read_bus(self.bus),
        }
    }
}
