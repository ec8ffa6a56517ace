//! Output line serialization.
//!
//! Two line types travel from the reader to the host:
//!
//! ## Data line
//!
//! ```text
//! DATA: <seq> <col> <col> ... <col> \r\n
//! ```
//!
//! - `seq` - 4 hex digits, frame sequence number (wraps at 16 bits)
//! - `col` - 3 hex digits per sample (low 12 bits), each followed by a space
//!
//! ## Status line
//!
//! ```text
//! CTRL: <seq> multipick=D, cardread=D, outfmt=D, overrun=D, HoCk=D, MoCk=D, Error=D, Ready=D, Pick=D, Data <bus> \r\n
//! ```
//!
//! # Example
//!
//! ```
//! use reader_proto::{DataLine, Report};
//!
//! let line = DataLine::new(1, &[0x00A, 0xFFF]);
//! let mut buf = [0u8; 32];
//! let len = line.serialize(&mut buf).unwrap();
//! assert_eq!(&buf[..len], b"DATA: 0001 00A FFF \r\n");
//! ```

use crate::command::OutputFormat;
use crate::fmt::{decimal_len, write_hex_u12, write_hex_u16, write_u32};

const DATA_PREFIX: &[u8] = b"DATA: ";
const STATUS_PREFIX: &[u8] = b"CTRL: ";
const BUS_PREFIX: &[u8] = b"Data ";
const LINE_END: &[u8] = b"\r\n";

/// Bytes taken by a 4-digit sequence number and its trailing space.
const SEQUENCE_SIZE: usize = 5;

/// Bytes taken by one 3-digit sample column and its trailing space.
pub const COLUMN_SIZE: usize = 4;

/// Upper bound on the size of a serialized [`StatusLine`].
pub const MAX_STATUS_LINE_SIZE: usize = 128;

/// Size of a serialized [`DataLine`] carrying `samples` columns.
#[inline]
#[must_use]
pub const fn data_line_size(samples: usize) -> usize {
    DATA_PREFIX.len() + SEQUENCE_SIZE + samples * COLUMN_SIZE + LINE_END.len()
}

/// Error type for serialization operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerializeError {
    /// The output buffer is too small to hold the serialized line.
    BufferTooSmall,
    /// A write operation failed (for I/O adapters).
    WriteError,
}

impl core::fmt::Display for SerializeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::WriteError => write!(f, "write error"),
        }
    }
}

/// A line that can be streamed to the host.
///
/// Implementors only describe the byte sequence through [`Report::encode`];
/// the buffer and I/O adapters are provided.
pub trait Report {
    /// Exact number of bytes the serialized line occupies.
    fn encoded_len(&self) -> usize;

    /// Feed the line to `emit` in order, a few bytes at a time.
    ///
    /// Stops at the first error returned by `emit`.
    fn encode<E, F>(&self, emit: F) -> Result<(), E>
    where
        F: FnMut(&[u8]) -> Result<(), E>;

    /// Serialize to the provided buffer.
    ///
    /// Returns the number of bytes written on success.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError::BufferTooSmall`] if the buffer is not large enough.
    fn serialize(&self, buf: &mut [u8]) -> Result<usize, SerializeError> {
        if buf.len() < self.encoded_len() {
            return Err(SerializeError::BufferTooSmall);
        }

        let mut pos = 0;
        self.encode(|chunk: &[u8]| -> Result<(), SerializeError> {
            buf[pos..pos + chunk.len()].copy_from_slice(chunk);
            pos += chunk.len();
            Ok(())
        })?;
        Ok(pos)
    }

    /// Serialize to a `heapless::Vec`.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError::BufferTooSmall`] if `N` is not large enough.
    #[cfg(feature = "heapless")]
    fn serialize_to_vec<const N: usize>(&self) -> Result<heapless::Vec<u8, N>, SerializeError> {
        let mut vec = heapless::Vec::new();
        vec.resize(N, 0)
            .map_err(|_| SerializeError::BufferTooSmall)?;
        let len = self.serialize(&mut vec)?;
        vec.truncate(len);
        Ok(vec)
    }

    /// Stream to an `embedded_io::Write` implementation.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError::WriteError`] if the write fails.
    #[cfg(feature = "embedded-io")]
    fn serialize_io<W: embedded_io::Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        self.encode(|chunk| writer.write_all(chunk).map_err(|_| SerializeError::WriteError))
    }
}

/// One card frame in raw hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLine<'a> {
    /// Frame sequence number since the last reset.
    pub sequence: u16,
    /// Latched data bus values, one per card column.
    pub samples: &'a [u16],
}

impl<'a> DataLine<'a> {
    /// Create a data line for the given frame.
    #[inline]
    #[must_use]
    pub const fn new(sequence: u16, samples: &'a [u16]) -> Self {
        Self { sequence, samples }
    }
}

impl Report for DataLine<'_> {
    fn encoded_len(&self) -> usize {
        data_line_size(self.samples.len())
    }

    fn encode<E, F>(&self, mut emit: F) -> Result<(), E>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
    {
        emit(DATA_PREFIX)?;
        emit(&sequence_field(self.sequence))?;

        let mut column = [b' '; COLUMN_SIZE];
        for &sample in self.samples {
            write_hex_u12(&mut column, sample);
            emit(&column)?;
        }

        emit(LINE_END)
    }
}

/// Snapshot of reader and device state for the `CTRL:` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusLine {
    /// Status line sequence number.
    pub sequence: u16,
    /// Continuous feeding is enabled.
    pub continuous: bool,
    /// Cards read since the last feed command.
    pub cards_read: u32,
    /// Selected output format.
    pub format: OutputFormat,
    /// The frame buffer has overrun.
    pub overrun: bool,
    /// Hopper-check line level.
    pub hopper_check: bool,
    /// Motion-check line level.
    pub motion_check: bool,
    /// Error line level.
    pub error: bool,
    /// Ready line level.
    pub ready: bool,
    /// Pick-control output level (high means paused).
    pub pick: bool,
    /// Current data bus value.
    pub data: u16,
}

impl StatusLine {
    fn fields(&self) -> [(&'static [u8], u32); 9] {
        [
            (b"multipick".as_slice(), u32::from(self.continuous)),
            (b"cardread".as_slice(), self.cards_read),
            (b"outfmt".as_slice(), u32::from(self.format.code())),
            (b"overrun".as_slice(), u32::from(self.overrun)),
            (b"HoCk".as_slice(), u32::from(self.hopper_check)),
            (b"MoCk".as_slice(), u32::from(self.motion_check)),
            (b"Error".as_slice(), u32::from(self.error)),
            (b"Ready".as_slice(), u32::from(self.ready)),
            (b"Pick".as_slice(), u32::from(self.pick)),
        ]
    }
}

impl Report for StatusLine {
    fn encoded_len(&self) -> usize {
        let fields: usize = self
            .fields()
            .iter()
            // name=value,
            .map(|(name, value)| name.len() + 1 + decimal_len(*value) + 2)
            .sum();
        STATUS_PREFIX.len()
            + SEQUENCE_SIZE
            + fields
            + BUS_PREFIX.len()
            + COLUMN_SIZE
            + LINE_END.len()
    }

    fn encode<E, F>(&self, mut emit: F) -> Result<(), E>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
    {
        emit(STATUS_PREFIX)?;
        emit(&sequence_field(self.sequence))?;

        for (name, value) in self.fields() {
            let mut digits = [0u8; 10];
            let len = write_u32(&mut digits, value);
            emit(name)?;
            emit(b"=")?;
            emit(&digits[..len])?;
            emit(b", ")?;
        }

        let mut column = [b' '; COLUMN_SIZE];
        write_hex_u12(&mut column, self.data);
        emit(BUS_PREFIX)?;
        emit(&column)?;
        emit(LINE_END)
    }
}

fn sequence_field(sequence: u16) -> [u8; SEQUENCE_SIZE] {
    let mut field = [b' '; SEQUENCE_SIZE];
    write_hex_u16(&mut field, sequence);
    field
}
