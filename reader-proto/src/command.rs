//! Single-character host commands.
//!
//! The host drives the reader by sending one ASCII byte per command over the
//! virtual serial port. Unknown bytes are ignored.
//!
//! | Byte | Command |
//! |------|---------|
//! | `R` | [`Command::Reset`] |
//! | `o` | [`Command::PickOne`] |
//! | `P` | [`Command::ContinuousOn`] |
//! | `p` | [`Command::ContinuousOff`] |
//! | `0`-`5` | [`Command::SelectFormat`] |
//! | `a` | [`Command::CycleActivity`] |
//! | `?`, `s` | [`Command::Status`] |

/// Output encoding selected with the digit commands.
///
/// Only the raw hex encoding is produced; the other encodings are accepted so
/// the host can select them, but frames are then consumed without output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OutputFormat {
    /// Power-on format, identical to [`OutputFormat::Raw`].
    #[default]
    Default = 0,
    /// `DATA:` lines with one 3-digit hex column per sample.
    Raw = 1,
    /// 8/12-bit binary.
    Binary = 2,
    /// Row-column batch cards.
    RowColumnBatch = 3,
    /// EBCDIC text.
    Ebcdic = 4,
    /// ASCII text.
    Ascii = 5,
}

impl OutputFormat {
    /// Map a command digit (`b'0'..=b'5'`) to a format.
    #[inline]
    #[must_use]
    pub const fn from_digit(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(Self::Default),
            b'1' => Some(Self::Raw),
            b'2' => Some(Self::Binary),
            b'3' => Some(Self::RowColumnBatch),
            b'4' => Some(Self::Ebcdic),
            b'5' => Some(Self::Ascii),
            _ => None,
        }
    }

    /// Numeric code reported as `outfmt` on the status line.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Whether frames are emitted as `DATA:` lines in this format.
    #[inline]
    #[must_use]
    pub const fn is_raw(self) -> bool {
        matches!(self, Self::Default | Self::Raw)
    }
}

/// A decoded host command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Clear acquisition state and stop the feed.
    Reset,
    /// Feed a single card.
    PickOne,
    /// Feed cards until told otherwise or the hopper runs dry.
    ContinuousOn,
    /// Stop feeding after the current card.
    ContinuousOff,
    /// Switch the output encoding.
    SelectFormat(OutputFormat),
    /// Step the activity LED through off, on and heartbeat.
    CycleActivity,
    /// Print one status line.
    ///
    /// Sent as `?` or `s`. Older reader firmware let `s` fall through to the
    /// activity command; here it always reports status.
    Status,
}

impl Command {
    /// Decode a command byte.
    ///
    /// Returns `None` for bytes that are not commands.
    ///
    /// # Example
    ///
    /// ```
    /// use reader_proto::{Command, OutputFormat};
    ///
    /// assert_eq!(Command::parse(b'P'), Some(Command::ContinuousOn));
    /// assert_eq!(Command::parse(b'1'), Some(Command::SelectFormat(OutputFormat::Raw)));
    /// assert_eq!(Command::parse(b'x'), None);
    /// ```
    #[must_use]
    pub const fn parse(byte: u8) -> Option<Self> {
        match byte {
            b'R' => Some(Self::Reset),
            b'o' => Some(Self::PickOne),
            b'P' => Some(Self::ContinuousOn),
            b'p' => Some(Self::ContinuousOff),
            b'a' => Some(Self::CycleActivity),
            b'?' | b's' => Some(Self::Status),
            _ => match OutputFormat::from_digit(byte) {
                Some(format) => Some(Self::SelectFormat(format)),
                None => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feed_commands() {
        assert_eq!(Command::parse(b'R'), Some(Command::Reset));
        assert_eq!(Command::parse(b'o'), Some(Command::PickOne));
        assert_eq!(Command::parse(b'P'), Some(Command::ContinuousOn));
        assert_eq!(Command::parse(b'p'), Some(Command::ContinuousOff));
    }

    #[test]
    fn test_parse_status_aliases() {
        assert_eq!(Command::parse(b'?'), Some(Command::Status));
        assert_eq!(Command::parse(b's'), Some(Command::Status));
        assert_eq!(Command::parse(b'a'), Some(Command::CycleActivity));
    }

    #[test]
    fn test_parse_format_digits() {
        assert_eq!(
            Command::parse(b'0'),
            Some(Command::SelectFormat(OutputFormat::Default))
        );
        assert_eq!(
            Command::parse(b'5'),
            Some(Command::SelectFormat(OutputFormat::Ascii))
        );
        assert_eq!(Command::parse(b'6'), None);
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert_eq!(Command::parse(0x00), None);
        assert_eq!(Command::parse(b'\r'), None);
        assert_eq!(Command::parse(b'r'), None);
        assert_eq!(Command::parse(0xFF), None);
    }

    #[test]
    fn test_format_codes() {
        assert_eq!(OutputFormat::Default.code(), 0);
        assert_eq!(OutputFormat::Ascii.code(), 5);
        assert!(OutputFormat::Default.is_raw());
        assert!(OutputFormat::Raw.is_raw());
        assert!(!OutputFormat::Ebcdic.is_raw());
        assert_eq!(OutputFormat::default(), OutputFormat::Default);
    }
}
