//! Host-facing protocol of the card reader USB bridge.
//!
//! This crate provides everything the firmware says to, and hears from, the
//! host over the virtual serial port:
//!
//! - **Commands**: single ASCII bytes sent by the host
//!   - [`Command`] - decoded command
//!   - [`OutputFormat`] - encoding selected with the digit commands
//!
//! - **Reports**: lines sent to the host
//!   - [`DataLine`] - one card frame as raw hex columns
//!   - [`StatusLine`] - reader counters and device line levels
//!   - [`Report`] - streaming serialization shared by both
//!
//! # Example
//!
//! ```
//! use reader_proto::{Command, DataLine, Report};
//!
//! assert_eq!(Command::parse(b'o'), Some(Command::PickOne));
//!
//! let mut buf = [0u8; 32];
//! let len = DataLine::new(0, &[0x801]).serialize(&mut buf).unwrap();
//! assert_eq!(&buf[..len], b"DATA: 0000 801 \r\n");
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting (for embedded logging)
//! - **`heapless`**: Enable `serialize_to_vec()`
//! - **`embedded-io`**: Enable `serialize_io()` for byte-stream writers
//!
//! # No-std Support
//!
//! This crate is `#![no_std]` by default and uses no heap allocations.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod command;
pub mod fmt;
pub mod report;

pub use command::{Command, OutputFormat};
pub use report::{
    data_line_size, DataLine, Report, SerializeError, StatusLine, COLUMN_SIZE,
    MAX_STATUS_LINE_SIZE,
};
