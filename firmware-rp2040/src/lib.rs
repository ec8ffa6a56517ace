//! Punched card reader to USB serial bridge for RP2040.
//!
//! This crate provides the embedded side of the card reader bridge: it
//! latches the reader's parallel data bus on every column strobe, collects
//! whole cards into frames and streams them to the host over a USB virtual
//! serial port.
//!
//! # Overview
//!
//! The firmware runs on a Raspberry Pi Pico (RP2040) and:
//! 1. Receives single-character commands from the host (USB CDC-ACM)
//! 2. Drives the reader's pick-control line to feed cards
//! 3. Sends every card as a `DATA:` line and status as a `CTRL:` line
//!
//! # Architecture
//!
//! Two executors share the work:
//!
//! - **Interrupt executor** (`SWI_IRQ_1`): USB device, bulk-IN and bulk-OUT
//!   tasks, and the strobe, busy and hopper edge handlers
//! - **Thread executor**: the main loop, which calls
//!   [`Controller::poll`](reader_core::Controller::poll) and yields
//!
//! Handlers preempt the main loop and talk to it only through the lock-free
//! rings and frame buffer from [`reader_core`].
//!
//! # Modules
//!
//! - [`config`]: pin map and USB identity
//! - [`board`]: data bus, edge handlers and status lines
//! - [`usb_serial`]: CDC-ACM endpoints ([`UsbPacketWriter`])
//!
//! # Features
//!
//! - **`dev-panic`** (default): Use `panic-probe` for development (prints panic info via RTT)
//! - **`prod-panic`**: Use `panic-reset` for production (silent watchdog reset)

#![no_std]

#[cfg(all(feature = "dev-panic", feature = "prod-panic"))]
compile_error!("Cannot enable both `dev-panic` and `prod-panic` - they define conflicting panic handlers");

// Re-export core types for convenience
pub use reader_core::{
    ActivityMode, BulkInPump, BulkOutSink, Controller, ControllerError, FrameBuffer,
    FrameProducer, PickControl, RingBuffer, SerialTransport, DEFAULT_SLOTS, MAX_PACKET_SIZE,
    MAX_POSITIONS,
};

pub mod board;
pub mod config;
pub mod usb_serial;

pub use board::{BoardStatus, DataBus, SharedBus};
pub use usb_serial::{configure_usb_serial, PacketChannel, UsbPacketWriter, UsbPump};
