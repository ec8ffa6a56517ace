//! Byte-stream serial transport over a packet-oriented USB link.
//!
//! Three parts share two [`RingBuffer`](crate::RingBuffer)s:
//!
//! - [`SerialTransport`]: main-loop side, reads commands and writes text.
//! - [`BulkInPump`]: moves queued bytes into IN packets. Driven both by
//!   [`SerialTransport::put_char`] and by the transmit-complete event.
//! - [`BulkOutSink`]: copies OUT packets into the receive ring.
//!
//! The transmit side is a two-state machine. While [`LinkState::Idle`] no
//! packet is in flight and the next queued byte starts one immediately;
//! while [`LinkState::Sending`] bytes accumulate until the hardware reports
//! completion, which drains the next packet.

use core::cell::RefCell;
use critical_section::{CriticalSection, Mutex};

use crate::ring::{Consumer, Producer};

/// Largest packet handed to the hardware in one transmission.
pub const MAX_PACKET_SIZE: usize = 64;

/// Busy polls spent waiting for room before forcing a flush.
pub const PUT_RETRIES: u32 = 100_000;

/// Hardware primitive that starts an asynchronous IN transfer.
///
/// Completion is reported back through [`BulkInPump::on_transmit_complete`].
pub trait PacketWriter {
    /// Begin transmitting `packet` (1 to [`MAX_PACKET_SIZE`] bytes).
    fn start_transmit(&mut self, packet: &[u8]);
}

/// Transmit path state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    /// No packet in flight.
    Idle,
    /// A packet was handed to the hardware and has not completed yet.
    Sending,
}

/// Error returned by the transmit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The transmit ring stayed full after retrying and a forced flush.
    Saturated,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Saturated => write!(f, "transmit buffer saturated"),
        }
    }
}

impl embedded_io::Error for TransportError {
    fn kind(&self) -> embedded_io::ErrorKind {
        embedded_io::ErrorKind::Other
    }
}

struct PumpState<'a, W, const N: usize> {
    tx: Consumer<'a, u8, N>,
    writer: W,
    state: LinkState,
    packets_sent: u32,
}

impl<W: PacketWriter, const N: usize> PumpState<'_, W, N> {
    fn submit_if_ready(&mut self) -> bool {
        if self.state != LinkState::Idle {
            return false;
        }

        let mut packet = [0u8; MAX_PACKET_SIZE];
        let mut len = 0;
        while len < MAX_PACKET_SIZE {
            match self.tx.get() {
                Some(byte) => {
                    packet[len] = byte;
                    len += 1;
                }
                None => break,
            }
        }

        if len == 0 {
            return false;
        }

        self.writer.start_transmit(&packet[..len]);
        self.state = LinkState::Sending;
        self.packets_sent = self.packets_sent.wrapping_add(1);
        true
    }
}

/// Drains the transmit ring into IN packets.
///
/// Shared by reference between the main loop and the USB completion handler;
/// every operation runs inside a critical section.
pub struct BulkInPump<'a, W, const N: usize = 64> {
    inner: Mutex<RefCell<PumpState<'a, W, N>>>,
}

impl<'a, W: PacketWriter, const N: usize> BulkInPump<'a, W, N> {
    /// Create an idle pump draining `tx` into `writer`.
    pub fn new(tx: Consumer<'a, u8, N>, writer: W) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(PumpState {
                tx,
                writer,
                state: LinkState::Idle,
                packets_sent: 0,
            })),
        }
    }

    /// Start a packet if the link is idle and bytes are queued.
    ///
    /// Returns whether a packet was handed to the writer.
    pub fn submit_if_ready(&self) -> bool {
        critical_section::with(|cs| self.submit_if_ready_in(cs))
    }

    fn submit_if_ready_in(&self, cs: CriticalSection<'_>) -> bool {
        self.inner.borrow_ref_mut(cs).submit_if_ready()
    }

    /// Handle completion of the packet in flight.
    ///
    /// Returns whether a follow-up packet was started. When it was not and the
    /// completed packet was full-size, the caller terminates the transfer with
    /// a zero-length packet.
    pub fn on_transmit_complete(&self) -> bool {
        critical_section::with(|cs| {
            let mut pump = self.inner.borrow_ref_mut(cs);
            pump.state = LinkState::Idle;
            pump.submit_if_ready()
        })
    }

    /// Forget any packet in flight after the link was reset or unplugged.
    pub fn on_link_reset(&self) {
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).state = LinkState::Idle;
        });
    }

    /// Current transmit state.
    pub fn state(&self) -> LinkState {
        critical_section::with(|cs| self.inner.borrow_ref(cs).state)
    }

    /// Packets handed to the writer so far (wrapping).
    pub fn packets_sent(&self) -> u32 {
        critical_section::with(|cs| self.inner.borrow_ref(cs).packets_sent)
    }
}

/// Main-loop side of the serial link.
pub struct SerialTransport<'a, W, const N: usize = 64> {
    rx: Consumer<'a, u8, N>,
    tx: Producer<'a, u8, N>,
    pump: &'a BulkInPump<'a, W, N>,
}

impl<'a, W: PacketWriter, const N: usize> SerialTransport<'a, W, N> {
    /// Build the transport from the receive consumer, the transmit producer
    /// and the pump that owns the transmit consumer.
    pub fn new(rx: Consumer<'a, u8, N>, tx: Producer<'a, u8, N>, pump: &'a BulkInPump<'a, W, N>) -> Self {
        Self { rx, tx, pump }
    }

    /// Next received byte, if any. Never blocks.
    #[inline]
    pub fn get_char(&mut self) -> Option<u8> {
        self.rx.get()
    }

    /// Queue one byte for transmission.
    ///
    /// Spins while the transmit ring is full, forces one flush if it stays
    /// full, and starts a packet right away when the link is idle.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Saturated`] if no room frees up. The byte
    /// is discarded.
    pub fn put_char(&mut self, byte: u8) -> Result<(), TransportError> {
        let mut retries = PUT_RETRIES;
        while self.tx.is_full() && retries > 0 {
            retries -= 1;
            core::hint::spin_loop();
        }

        if self.tx.is_full() {
            self.pump.submit_if_ready();
            if self.tx.is_full() {
                return Err(TransportError::Saturated);
            }
        }

        critical_section::with(|cs| {
            self.tx.put(byte).map_err(|_| TransportError::Saturated)?;
            self.pump.submit_if_ready_in(cs);
            Ok(())
        })
    }

    /// Queue every byte of `bytes`, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Saturated`] if the link stops draining.
    pub fn put_str(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        bytes.iter().try_for_each(|&b| self.put_char(b))
    }
}

impl<W: PacketWriter, const N: usize> embedded_io::ErrorType for SerialTransport<'_, W, N> {
    type Error = TransportError;
}

impl<W: PacketWriter, const N: usize> embedded_io::Write for SerialTransport<'_, W, N> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        for (written, &byte) in buf.iter().enumerate() {
            if let Err(e) = self.put_char(byte) {
                return if written == 0 { Err(e) } else { Ok(written) };
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.pump.submit_if_ready();
        Ok(())
    }
}

/// USB OUT side of the serial link.
pub struct BulkOutSink<'a, const N: usize = 64> {
    rx: Producer<'a, u8, N>,
    rx_idle: bool,
    dropped: u32,
}

impl<'a, const N: usize> BulkOutSink<'a, N> {
    /// Create a sink filling `rx`.
    pub fn new(rx: Producer<'a, u8, N>) -> Self {
        Self {
            rx,
            rx_idle: true,
            dropped: 0,
        }
    }

    /// Copy a received packet into the receive ring.
    ///
    /// Bytes that do not fit are discarded. Returns how many were discarded
    /// from this packet.
    pub fn on_packet_received(&mut self, packet: &[u8]) -> usize {
        self.rx_idle = false;
        let lost = packet
            .iter()
            .filter(|&&byte| self.rx.put(byte).is_err())
            .count();
        self.dropped = self.dropped.wrapping_add(lost as u32);
        lost
    }

    /// Whether no packet has been received yet.
    pub fn is_rx_idle(&self) -> bool {
        self.rx_idle
    }

    /// Total bytes discarded because the receive ring was full (wrapping).
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}
