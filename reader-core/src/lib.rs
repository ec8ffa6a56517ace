//! Platform-agnostic buffering and control for the card reader USB bridge.
//!
//! This crate holds everything between the GPIO edge handlers, the USB
//! endpoints and the main loop, without any platform-specific dependencies.
//! It runs in embedded `no_std` environments and on host for testing.
//!
//! # Overview
//!
//! - [`ring`]: lock-free single-producer single-consumer queue ([`RingBuffer`])
//! - [`transport`]: byte stream over USB packets ([`SerialTransport`],
//!   [`BulkInPump`], [`BulkOutSink`])
//! - [`acquisition`]: card frame slots with overrun detection ([`FrameBuffer`])
//! - [`pick`]: shared pick-control output ([`PickControl`])
//! - [`controller`]: the main loop ([`Controller`])
//!
//! # Execution model
//!
//! Edge and USB handlers preempt the main loop. Handlers only touch their own
//! end of a queue; the few multi-step updates that span both ends run inside
//! a `critical_section::with` block.
//!
//! # Example
//!
//! ```rust
//! use reader_core::{FrameBuffer, RingBuffer};
//!
//! let mut ring: RingBuffer<u8, 64> = RingBuffer::new();
//! let (mut rx_fill, mut rx) = ring.split();
//! rx_fill.put(b'?').unwrap();
//! assert_eq!(rx.get(), Some(b'?'));
//!
//! let mut frames: FrameBuffer<4, 82> = FrameBuffer::new();
//! let (handlers, mut main_loop) = frames.split();
//! handlers.on_sample(0x801);
//! handlers.on_frame_complete();
//!
//! let mut card = [0u16; 82];
//! assert_eq!(main_loop.try_take(&mut card), Ok(Some(1)));
//! assert_eq!(card[0], 0x801);
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting (for embedded logging)

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod acquisition;
pub mod controller;
pub mod pick;
pub mod ring;
pub mod transport;

// Re-export main types at crate root
pub use acquisition::{
    AcquisitionError, AcquisitionStatus, FrameBuffer, FrameCompletion, FrameConsumer,
    FrameProducer, Sample, DEFAULT_SLOTS, MAX_POSITIONS,
};
pub use controller::{
    ActivityMode, Controller, ControllerError, LineLevels, StatusInputs, STATUS_INTERVAL,
};
pub use pick::PickControl;
pub use ring::{Consumer, Producer, RingBuffer};
pub use transport::{
    BulkInPump, BulkOutSink, LinkState, PacketWriter, SerialTransport, TransportError,
    MAX_PACKET_SIZE, PUT_RETRIES,
};
