//! No-std number formatting for the RAW and CTRL output lines.
//!
//! These functions write digits straight into byte buffers, the same way the
//! reader firmware has always streamed them out one character at a time.

/// Hex digits lookup table for fast conversion.
const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Write the low `digits` nibbles of `value` as uppercase hex.
///
/// Higher nibbles are discarded, so `write_hex(buf, 0x1ABC, 3)` writes `ABC`.
/// Returns the number of bytes written (always `digits`).
///
/// # Panics
///
/// Panics if `buf.len() < digits` or `digits > 8`.
#[inline]
pub fn write_hex(buf: &mut [u8], value: u32, digits: usize) -> usize {
    debug_assert!(digits <= 8, "u32 has at most 8 nibbles");
    debug_assert!(buf.len() >= digits, "buffer too small for hex digits");
    for (i, slot) in buf[..digits].iter_mut().enumerate() {
        let shift = 4 * (digits - 1 - i);
        *slot = HEX_DIGITS[((value >> shift) & 0xF) as usize];
    }
    digits
}

/// Write a u16 as 4 uppercase hex digits.
#[inline]
pub fn write_hex_u16(buf: &mut [u8], value: u16) -> usize {
    write_hex(buf, u32::from(value), 4)
}

/// Write the low 12 bits of a sample as 3 uppercase hex digits.
///
/// One digit per group of four data lines on the 12-line card bus.
#[inline]
pub fn write_hex_u12(buf: &mut [u8], value: u16) -> usize {
    write_hex(buf, u32::from(value), 3)
}

/// Number of decimal digits needed for `value`.
#[inline]
#[must_use]
pub const fn decimal_len(value: u32) -> usize {
    let mut n = value;
    let mut len = 1;
    while n >= 10 {
        n /= 10;
        len += 1;
    }
    len
}

/// Write a u32 as an unsigned decimal string without leading zeros.
///
/// Returns the number of bytes written (1-10 bytes).
///
/// # Panics
///
/// Panics if the buffer is shorter than [`decimal_len`] of `value`.
#[inline]
pub fn write_u32(buf: &mut [u8], value: u32) -> usize {
    let len = decimal_len(value);
    debug_assert!(buf.len() >= len, "buffer too small for u32");

    let mut n = value;
    for slot in buf[..len].iter_mut().rev() {
        *slot = b'0' + (n % 10) as u8;
        n /= 10;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_hex_u16() {
        let mut buf = [0u8; 4];

        write_hex_u16(&mut buf, 0x0000);
        assert_eq!(&buf, b"0000");

        write_hex_u16(&mut buf, 0xFFFF);
        assert_eq!(&buf, b"FFFF");

        write_hex_u16(&mut buf, 0x00AB);
        assert_eq!(&buf, b"00AB");
    }

    #[test]
    fn test_write_hex_u12_masks_high_nibble() {
        let mut buf = [0u8; 3];

        write_hex_u12(&mut buf, 0x0FFF);
        assert_eq!(&buf, b"FFF");

        write_hex_u12(&mut buf, 0xF00A);
        assert_eq!(&buf, b"00A");

        write_hex_u12(&mut buf, 0x0123);
        assert_eq!(&buf, b"123");
    }

    #[test]
    fn test_decimal_len() {
        assert_eq!(decimal_len(0), 1);
        assert_eq!(decimal_len(9), 1);
        assert_eq!(decimal_len(10), 2);
        assert_eq!(decimal_len(99_999), 5);
        assert_eq!(decimal_len(u32::MAX), 10);
    }

    #[test]
    fn test_write_u32() {
        let mut buf = [0u8; 10];

        let len = write_u32(&mut buf, 0);
        assert_eq!(&buf[..len], b"0");

        let len = write_u32(&mut buf, 7);
        assert_eq!(&buf[..len], b"7");

        let len = write_u32(&mut buf, 1000);
        assert_eq!(&buf[..len], b"1000");

        let len = write_u32(&mut buf, u32::MAX);
        assert_eq!(&buf[..len], b"4294967295");
    }
}
