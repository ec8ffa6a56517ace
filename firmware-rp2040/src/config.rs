//! Board wiring and USB identity.
//!
//! # Pin map (Raspberry Pi Pico)
//!
//! | Signal | GPIO | Direction | Meaning |
//! |--------|------|-----------|---------|
//! | D0-D11 | 0-11 | in, pull-up | Data bus, active low |
//! | IM-    | 12   | in, pull-up | Falling edge: column ready |
//! | BSY    | 13   | in, pull-up | Rising edge: card read complete |
//! | HCK    | 14   | in, pull-up | Hopper check, falling edge: hopper empty |
//! | MCK    | 15   | in, pull-up | Motion check |
//! | ERR    | 16   | in, pull-up | Reader error |
//! | RDY    | 17   | in, pull-up | Reader ready |
//! | PC     | 18   | out | Pick control, high pauses feeding |
//! | LED    | 25   | out | Activity LED |

/// pid.codes test vendor ID.
pub const USB_VID: u16 = 0x1209;
/// pid.codes test product ID.
pub const USB_PID: u16 = 0x0001;

pub const USB_MANUFACTURER: &str = "Rust Card Reader";
pub const USB_PRODUCT: &str = "Card Reader Serial Bridge";
pub const USB_SERIAL_NUMBER: &str = "001";

/// Bus power drawn from the host, in mA.
pub const USB_MAX_POWER_MA: u16 = 100;

/// Number of data bus lines.
pub const DATA_LINES: usize = 12;

/// GPIO input bits carrying the data bus. D0-D11 must sit on GP0-GP11.
pub const DATA_MASK: u32 = (1 << DATA_LINES) - 1;
