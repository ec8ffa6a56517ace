//! Main-loop controller: host commands in, card frames and status out.
//!
//! [`Controller::poll`] is called in a tight loop by the lowest-priority task.
//! Each call handles at most one command byte, drains every finished frame
//! and updates the activity LED.

use embedded_hal::digital::OutputPin;
use reader_proto::{Command, DataLine, OutputFormat, Report, StatusLine};

use crate::acquisition::{FrameConsumer, Sample, DEFAULT_SLOTS, MAX_POSITIONS};
use crate::pick::PickControl;
use crate::transport::{PacketWriter, SerialTransport, TransportError};

/// Polls between heartbeat status lines (and LED toggles).
pub const STATUS_INTERVAL: u32 = 100_000;

const LINE_END: &[u8] = b"\r\n";

/// Activity LED behaviour, stepped by [`Command::CycleActivity`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActivityMode {
    /// LED lit only while a frame is being taken.
    #[default]
    Off,
    /// LED steadily on.
    On,
    /// LED blinks and a status line is sent every [`STATUS_INTERVAL`] polls.
    Heartbeat,
}

impl ActivityMode {
    /// The mode after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Off => Self::On,
            Self::On => Self::Heartbeat,
            Self::Heartbeat => Self::Off,
        }
    }
}

/// Levels of the reader's status lines and data bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineLevels {
    pub hopper_check: bool,
    pub motion_check: bool,
    pub error: bool,
    pub ready: bool,
    /// Data bus, already inverted so a hole reads as `1`.
    pub data: Sample,
}

/// Source of the levels reported on the status line.
pub trait StatusInputs {
    /// Sample every status line.
    fn levels(&mut self) -> LineLevels;
}

/// Error type for controller operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerError {
    /// Output could not be queued.
    Transport(TransportError),
    /// A GPIO could not be driven.
    Pin,
}

impl From<TransportError> for ControllerError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl core::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Pin => write!(f, "gpio error"),
        }
    }
}

/// Ties the serial link, the frame buffer and the reader control lines
/// together.
pub struct Controller<
    'a,
    W,
    P,
    L,
    const N: usize = 64,
    const R: usize = DEFAULT_SLOTS,
    const M: usize = MAX_POSITIONS,
> {
    serial: SerialTransport<'a, W, N>,
    frames: FrameConsumer<'a, R, M>,
    pick: &'a PickControl<P>,
    led: L,
    format: OutputFormat,
    activity: ActivityMode,
    frames_written: u16,
    status_written: u16,
    ticks: u32,
    /// End-of-line bytes still owed after a line was cut short.
    line_tail: &'static [u8],
    frame: [Sample; M],
}

impl<'a, W, P, L, const N: usize, const R: usize, const M: usize> Controller<'a, W, P, L, N, R, M>
where
    W: PacketWriter,
    P: OutputPin,
    L: OutputPin,
{
    /// Create a controller in RAW format with the activity LED off.
    pub fn new(
        serial: SerialTransport<'a, W, N>,
        frames: FrameConsumer<'a, R, M>,
        pick: &'a PickControl<P>,
        led: L,
    ) -> Self {
        Self {
            serial,
            frames,
            pick,
            led,
            format: OutputFormat::Default,
            activity: ActivityMode::Off,
            frames_written: 0,
            status_written: 0,
            ticks: 0,
            line_tail: &[],
            frame: [0; M],
        }
    }

    /// Run one iteration of the main loop.
    ///
    /// # Errors
    ///
    /// Returns the first transport or GPIO failure. The iteration is
    /// abandoned at that point; the next call starts afresh.
    pub fn poll<S: StatusInputs>(&mut self, inputs: &mut S) -> Result<(), ControllerError> {
        if let Some(command) = self.serial.get_char().and_then(Command::parse) {
            self.execute(command, inputs)?;
        }
        self.drain_frames()?;
        self.update_activity(inputs)
    }

    /// Apply one host command.
    ///
    /// # Errors
    ///
    /// Returns an error if the pick line or the serial link fails.
    pub fn execute<S: StatusInputs>(
        &mut self,
        command: Command,
        inputs: &mut S,
    ) -> Result<(), ControllerError> {
        match command {
            Command::Reset => {
                self.frames.reset();
                self.pick.pause().map_err(|_| ControllerError::Pin)?;
                self.frames_written = 0;
            }
            Command::PickOne | Command::ContinuousOn => {
                // continuous must be set before the reader can finish a card
                self.frames.set_continuous(command == Command::ContinuousOn);
                self.frames.clear_frame_count();
                self.pick.feed().map_err(|_| ControllerError::Pin)?;
            }
            Command::ContinuousOff => self.frames.set_continuous(false),
            Command::SelectFormat(format) => self.format = format,
            Command::CycleActivity => self.activity = self.activity.next(),
            Command::Status => self.write_status(inputs)?,
        }
        Ok(())
    }

    /// Take every committed frame, emitting RAW lines when selected.
    ///
    /// Stops quietly on overrun; the condition stays visible on the status
    /// line until a reset. Returns the number of frames taken.
    ///
    /// Every taken frame consumes a sequence number, even when its line
    /// cannot be sent in full, so the host sees a gap for each lost card.
    ///
    /// # Errors
    ///
    /// Returns an error if the LED or the serial link fails.
    pub fn drain_frames(&mut self) -> Result<usize, ControllerError> {
        let mut taken = 0;
        loop {
            // nothing is taken until the link can start a fresh line
            self.close_cut_line()?;

            self.led.set_high().map_err(|_| ControllerError::Pin)?;
            let result = self.frames.try_take(&mut self.frame);
            self.led.set_low().map_err(|_| ControllerError::Pin)?;

            let Ok(Some(len)) = result else {
                return Ok(taken);
            };
            taken += 1;

            if self.format.is_raw() {
                let sequence = self.frames_written;
                self.frames_written = sequence.wrapping_add(1);
                let line = DataLine::new(sequence, &self.frame[..len]);
                Self::send_line_split(&mut self.serial, &mut self.line_tail, &line)?;
            }
        }
    }

    /// Send one `CTRL:` line.
    ///
    /// # Errors
    ///
    /// Returns an error if the serial link is saturated.
    pub fn write_status<S: StatusInputs>(&mut self, inputs: &mut S) -> Result<(), ControllerError> {
        let levels = inputs.levels();
        let acquisition = self.frames.status();
        let line = StatusLine {
            sequence: self.status_written,
            continuous: acquisition.continuous,
            cards_read: acquisition.frames_completed,
            format: self.format,
            overrun: acquisition.overrun,
            hopper_check: levels.hopper_check,
            motion_check: levels.motion_check,
            error: levels.error,
            ready: levels.ready,
            pick: self.pick.is_paused(),
            data: levels.data,
        };

        self.close_cut_line()?;
        self.status_written = self.status_written.wrapping_add(1);
        self.send_line(&line)
    }

    /// Stream one line. If the link saturates partway, try to terminate
    /// the fragment now and otherwise before the next line.
    fn send_line<T: Report>(&mut self, line: &T) -> Result<(), ControllerError> {
        Self::send_line_split(&mut self.serial, &mut self.line_tail, line)
    }

    fn send_line_split<T: Report>(
        serial: &mut SerialTransport<'a, W, N>,
        line_tail: &mut &'static [u8],
        line: &T,
    ) -> Result<(), ControllerError> {
        let sent = line.encode(|chunk| serial.put_str(chunk));
        if let Err(e) = sent {
            *line_tail = LINE_END;
            let _ = Self::close_cut_line_split(serial, line_tail);
            return Err(e.into());
        }
        Ok(())
    }

    fn close_cut_line(&mut self) -> Result<(), TransportError> {
        Self::close_cut_line_split(&mut self.serial, &mut self.line_tail)
    }

    fn close_cut_line_split(
        serial: &mut SerialTransport<'a, W, N>,
        line_tail: &mut &'static [u8],
    ) -> Result<(), TransportError> {
        while let Some((&byte, rest)) = line_tail.split_first() {
            serial.put_char(byte)?;
            *line_tail = rest;
        }
        Ok(())
    }

    fn update_activity<S: StatusInputs>(&mut self, inputs: &mut S) -> Result<(), ControllerError> {
        let lit = match self.activity {
            ActivityMode::Off => false,
            ActivityMode::On => true,
            ActivityMode::Heartbeat => {
                let tick = self.ticks;
                self.ticks = self.ticks.wrapping_add(1);
                if tick % STATUS_INTERVAL == 0 {
                    self.write_status(inputs)?;
                }
                (tick / STATUS_INTERVAL) % 2 == 1
            }
        };

        if lit {
            self.led.set_high().map_err(|_| ControllerError::Pin)
        } else {
            self.led.set_low().map_err(|_| ControllerError::Pin)
        }
    }

    /// Selected output format.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Current activity LED mode.
    pub fn activity(&self) -> ActivityMode {
        self.activity
    }

    /// Sequence number of the next `DATA:` line.
    pub fn frames_written(&self) -> u16 {
        self.frames_written
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::acquisition::{FrameBuffer, FrameProducer};
    use crate::ring::RingBuffer;
    use crate::transport::{BulkInPump, BulkOutSink};
    use core::convert::Infallible;
    use std::string::String;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::vec::Vec;

    // Collects every transmitted byte.
    #[derive(Clone, Default)]
    struct Wire {
        bytes: Arc<StdMutex<Vec<u8>>>,
    }

    impl Wire {
        fn take_text(&self) -> String {
            let bytes = core::mem::take(&mut *self.bytes.lock().unwrap());
            String::from_utf8(bytes).unwrap()
        }
    }

    impl PacketWriter for Wire {
        fn start_transmit(&mut self, packet: &[u8]) {
            self.bytes.lock().unwrap().extend_from_slice(packet);
        }
    }

    #[derive(Clone, Default)]
    struct MockPin {
        high: Arc<StdMutex<bool>>,
        writes: Arc<StdMutex<u32>>,
    }

    impl MockPin {
        fn is_high(&self) -> bool {
            *self.high.lock().unwrap()
        }
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            *self.high.lock().unwrap() = false;
            *self.writes.lock().unwrap() += 1;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            *self.high.lock().unwrap() = true;
            *self.writes.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[derive(Clone, Copy)]
    struct FixedLevels(LineLevels);

    impl StatusInputs for FixedLevels {
        fn levels(&mut self) -> LineLevels {
            self.0
        }
    }

    const IDLE_LINES: FixedLevels = FixedLevels(LineLevels {
        hopper_check: false,
        motion_check: false,
        error: false,
        ready: true,
        data: 0,
    });

    // Holds a whole 80-column DATA line.
    const LINE_RING: usize = 512;

    type TestController<'a, const N: usize> =
        Controller<'a, Wire, MockPin, MockPin, N, 4, MAX_POSITIONS>;

    struct Harness<'a, const N: usize> {
        controller: TestController<'a, N>,
        host: BulkOutSink<'a, N>,
        frames: FrameProducer<'a, 4, MAX_POSITIONS>,
        pump: &'a BulkInPump<'a, Wire, N>,
        wire: Wire,
        pick_pin: MockPin,
        led: MockPin,
    }

    impl<const N: usize> Harness<'_, N> {
        fn send(&mut self, command: u8) {
            self.host.on_packet_received(&[command]);
            self.poll();
        }

        fn poll(&mut self) {
            self.try_poll().unwrap();
        }

        // The host completes transfers only once the poll has returned.
        fn try_poll(&mut self) -> Result<(), ControllerError> {
            let mut lines = IDLE_LINES;
            let result = self.controller.poll(&mut lines);
            while self.pump.on_transmit_complete() {}
            result
        }

        fn card(&self, samples: &[Sample]) {
            for &s in samples {
                self.frames.on_sample(s);
            }
            self.frames.on_frame_complete();
        }
    }

    struct Parts<const N: usize> {
        rx: RingBuffer<u8, N>,
        tx: RingBuffer<u8, N>,
        frames: FrameBuffer<4, MAX_POSITIONS>,
    }

    impl<const N: usize> Parts<N> {
        fn with_ring() -> Self {
            Self {
                rx: RingBuffer::new(),
                tx: RingBuffer::new(),
                frames: FrameBuffer::new(),
            }
        }
    }

    impl Parts<LINE_RING> {
        fn new() -> Self {
            Self::with_ring()
        }
    }

    fn harness<'a, const N: usize>(
        parts: &'a mut Parts<N>,
        pump_slot: &'a mut Option<BulkInPump<'a, Wire, N>>,
        pick_slot: &'a mut Option<PickControl<MockPin>>,
    ) -> Harness<'a, N> {
        let (host, rx) = parts.rx.split();
        let (tx, drain) = parts.tx.split();
        let (producer, consumer) = parts.frames.split();

        let wire = Wire::default();
        let pump: &'a BulkInPump<'a, Wire, N> =
            pump_slot.insert(BulkInPump::new(drain, wire.clone()));
        let pick_pin = MockPin::default();
        let pick: &'a PickControl<MockPin> =
            pick_slot.insert(PickControl::new(pick_pin.clone()).unwrap());
        let led = MockPin::default();

        let serial = SerialTransport::new(rx, tx, pump);
        Harness {
            controller: Controller::new(serial, consumer, pick, led.clone()),
            host: BulkOutSink::new(host),
            frames: producer,
            pump,
            wire,
            pick_pin,
            led,
        }
    }

    #[test]
    fn test_raw_frames_are_printed_in_order() {
        let mut parts = Parts::new();
        let (mut pump, mut pick) = (None, None);
        let mut h = harness(&mut parts, &mut pump, &mut pick);

        h.card(&[0x00A, 0x0FF]);
        h.card(&[0xFFF]);
        h.poll();

        assert_eq!(
            h.wire.take_text(),
            "DATA: 0000 00A 0FF \r\nDATA: 0001 FFF \r\n"
        );
        assert_eq!(h.controller.frames_written(), 2);
        assert!(!h.led.is_high());
    }

    #[test]
    fn test_full_card_is_one_line() {
        let mut parts = Parts::new();
        let (mut pump, mut pick) = (None, None);
        let mut h = harness(&mut parts, &mut pump, &mut pick);

        let card: Vec<Sample> = (0..80).collect();
        h.card(&card);
        h.poll();

        let mut expected = String::from("DATA: 0000 ");
        for column in 0..80 {
            expected.push_str(&std::format!("{column:03X} "));
        }
        expected.push_str("\r\n");

        let text = h.wire.take_text();
        assert_eq!(text.len(), 333);
        assert_eq!(text, expected);
        assert_eq!(h.controller.frames_written(), 1);
    }

    #[test]
    fn test_saturated_line_keeps_sequence_and_is_terminated() {
        let mut parts = Parts::<64>::with_ring();
        let (mut pump, mut pick) = (None, None);
        let mut h = harness(&mut parts, &mut pump, &mut pick);

        let card: Vec<Sample> = (0..80).collect();
        h.card(&card);
        h.card(&[0xABC]);

        // one packet in flight plus a full ring, then the link stalls
        assert_eq!(
            h.try_poll(),
            Err(ControllerError::Transport(TransportError::Saturated))
        );
        assert_eq!(h.controller.frames_written(), 1);

        h.poll();
        assert_eq!(h.controller.frames_written(), 2);

        let text = h.wire.take_text();
        assert!(text.starts_with("DATA: 0000 000 001 "));
        assert!(text.ends_with("\r\nDATA: 0001 ABC \r\n"));
        assert_eq!(text.len(), 1 + 64 + 2 + 17);
        assert_eq!(text.matches("\r\n").count(), 2);
    }

    #[test]
    fn test_non_raw_format_consumes_silently() {
        let mut parts = Parts::new();
        let (mut pump, mut pick) = (None, None);
        let mut h = harness(&mut parts, &mut pump, &mut pick);

        h.send(b'4');
        assert_eq!(h.controller.format(), OutputFormat::Ebcdic);

        h.card(&[1, 2, 3]);
        h.poll();
        assert_eq!(h.wire.take_text(), "");
        assert_eq!(h.controller.frames_written(), 0);
        assert_eq!(h.controller.drain_frames(), Ok(0));
    }

    #[test]
    fn test_feed_commands_drive_pick_line() {
        let mut parts = Parts::new();
        let (mut pump, mut pick) = (None, None);
        let mut h = harness(&mut parts, &mut pump, &mut pick);
        assert!(h.pick_pin.is_high());

        h.send(b'P');
        assert!(!h.pick_pin.is_high());
        assert!(h.controller.frames.status().continuous);

        h.send(b'p');
        assert!(!h.controller.frames.status().continuous);

        h.send(b'o');
        assert!(!h.pick_pin.is_high());
        assert!(!h.controller.frames.status().continuous);

        h.send(b'R');
        assert!(h.pick_pin.is_high());
    }

    #[test]
    fn test_feed_clears_card_count() {
        let mut parts = Parts::new();
        let (mut pump, mut pick) = (None, None);
        let mut h = harness(&mut parts, &mut pump, &mut pick);

        h.card(&[1]);
        h.card(&[2]);
        assert_eq!(h.controller.frames.status().frames_completed, 2);

        h.send(b'o');
        assert_eq!(h.controller.frames.status().frames_completed, 0);
    }

    #[test]
    fn test_reset_restarts_sequence_and_clears_overrun() {
        let mut parts = Parts::new();
        let (mut pump, mut pick) = (None, None);
        let mut h = harness(&mut parts, &mut pump, &mut pick);

        h.card(&[1]);
        h.poll();
        for _ in 0..4 {
            h.card(&[2]);
        }
        assert!(h.controller.frames.status().overrun);
        h.poll();
        assert_eq!(h.wire.take_text(), "DATA: 0000 001 \r\n");

        h.send(b'R');
        assert!(!h.controller.frames.status().overrun);
        assert_eq!(h.controller.frames_written(), 0);

        h.card(&[3]);
        h.poll();
        assert_eq!(h.wire.take_text(), "DATA: 0000 003 \r\n");
    }

    #[test]
    fn test_status_command() {
        let mut parts = Parts::new();
        let (mut pump, mut pick) = (None, None);
        let mut h = harness(&mut parts, &mut pump, &mut pick);

        h.send(b'?');
        h.send(b's');
        assert_eq!(
            h.wire.take_text(),
            "CTRL: 0000 multipick=0, cardread=0, outfmt=0, overrun=0, HoCk=0, MoCk=0, \
             Error=0, Ready=1, Pick=1, Data 000 \r\n\
             CTRL: 0001 multipick=0, cardread=0, outfmt=0, overrun=0, HoCk=0, MoCk=0, \
             Error=0, Ready=1, Pick=1, Data 000 \r\n"
        );
    }

    #[test]
    fn test_activity_modes() {
        let mut parts = Parts::new();
        let (mut pump, mut pick) = (None, None);
        let mut h = harness(&mut parts, &mut pump, &mut pick);

        h.send(b'a');
        assert_eq!(h.controller.activity(), ActivityMode::On);
        assert!(h.led.is_high());

        // first heartbeat poll reports status straight away
        h.send(b'a');
        assert_eq!(h.controller.activity(), ActivityMode::Heartbeat);
        assert!(h.wire.take_text().starts_with("CTRL: 0000 "));
        assert!(!h.led.is_high());

        h.poll();
        assert_eq!(h.wire.take_text(), "");

        h.send(b'a');
        assert_eq!(h.controller.activity(), ActivityMode::Off);
        assert!(!h.led.is_high());
    }

    #[test]
    fn test_unknown_bytes_are_ignored() {
        let mut parts = Parts::new();
        let (mut pump, mut pick) = (None, None);
        let mut h = harness(&mut parts, &mut pump, &mut pick);

        let writes = *h.pick_pin.writes.lock().unwrap();
        for byte in *b"xyz\r\n" {
            h.send(byte);
        }
        assert_eq!(h.wire.take_text(), "");
        assert_eq!(*h.pick_pin.writes.lock().unwrap(), writes);
        assert_eq!(h.controller.format(), OutputFormat::Default);
    }

    #[test]
    fn test_activity_mode_cycle() {
        assert_eq!(ActivityMode::Off.next(), ActivityMode::On);
        assert_eq!(ActivityMode::On.next(), ActivityMode::Heartbeat);
        assert_eq!(ActivityMode::Heartbeat.next(), ActivityMode::Off);
    }
}
