//! Bit-window and alignment helpers over little-endian byte buffers.
//!
//! A buffer is treated as one little-endian integer: bit 0 is the least significant bit of the
//! first byte, bit 8 the least significant bit of the second byte, and so on. Bit-field members
//! declared in a description source are packed in this order, starting at bit 0 of their
//! container.

use crate::err::BitError;

fn check_window(buf: &[u8], start: usize, length: usize) -> Result<(), BitError> {
    if length > 64 {
        return Err(BitError::TooWide { length });
    }

    let bits = buf.len() * 8;
    if start.checked_add(length).is_none_or(|end| end > bits) {
        return Err(BitError::OutOfBounds {
            start,
            length,
            bits,
        });
    }

    Ok(())
}

/// Reads the `length`-bit window starting at bit `start`.
pub fn read_bits(buf: &[u8], start: usize, length: usize) -> Result<u64, BitError> {
    check_window(buf, start, length)?;

    let mut value = 0u64;
    for i in 0..length {
        let pos = start + i;
        let bit = (buf[pos / 8] >> (pos % 8)) & 1;
        value |= u64::from(bit) << i;
    }

    Ok(value)
}

/// Writes the low `length` bits of `value` into the window starting at bit `start`.
///
/// Bits of `value` above `length` are discarded; bits of `buf` outside the window are untouched.
pub fn write_bits(buf: &mut [u8], start: usize, length: usize, value: u64) -> Result<(), BitError> {
    check_window(buf, start, length)?;

    for i in 0..length {
        let pos = start + i;
        let mask = 1u8 << (pos % 8);
        if (value >> i) & 1 == 1 {
            buf[pos / 8] |= mask;
        } else {
            buf[pos / 8] &= !mask;
        }
    }

    Ok(())
}

/// Rounds `value` up to the next multiple of `alignment`, which must be a power of two.
pub fn align_up(value: u64, alignment: u64) -> Result<u64, BitError> {
    if !alignment.is_power_of_two() {
        return Err(BitError::AlignmentNotPowerOfTwo { alignment });
    }

    let mask = alignment - 1;
    value
        .checked_add(mask)
        .map(|v| v & !mask)
        .ok_or(BitError::Overflow { value, alignment })
}

/// Number of bytes needed after `length` bytes to reach the next `alignment` boundary.
pub fn padding_needed(length: u64, alignment: u64) -> Result<u64, BitError> {
    Ok(align_up(length, alignment)? - length)
}

/// Little-endian representation of `value`, truncated or zero-extended to `len` bytes.
pub fn value_to_le_bytes(value: u64, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    for (i, byte) in out.iter_mut().enumerate().take(8) {
        *byte = (value >> (i * 8)) as u8;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_bits_lsb_first() {
        let data = [0b1010_0101, 0b0000_0011];
        assert_eq!(read_bits(&data, 0, 4).unwrap(), 0b0101);
        assert_eq!(read_bits(&data, 4, 4).unwrap(), 0b1010);
        // Window straddling the byte boundary.
        assert_eq!(read_bits(&data, 6, 4).unwrap(), 0b1110);
        assert_eq!(read_bits(&data, 0, 16).unwrap(), 0x03A5);
    }

    #[test]
    fn test_write_then_read_recovers_value_modulo_width() {
        let mut buf = [0xFFu8; 8];
        for (start, length) in [(0, 1), (3, 5), (7, 9), (12, 20), (1, 32), (31, 32)] {
            for value in [0u64, 1, 0x5A5A_5A5A, u64::MAX] {
                write_bits(&mut buf, start, length, value).unwrap();
                let mask = if length == 64 { u64::MAX } else { (1 << length) - 1 };
                assert_eq!(
                    read_bits(&buf, start, length).unwrap(),
                    value & mask,
                    "window {start}+{length}"
                );
            }
        }
    }

    #[test]
    fn test_write_bits_leaves_neighbours_alone() {
        let mut buf = [0u8; 2];
        write_bits(&mut buf, 4, 6, 0b11_1111).unwrap();
        assert_eq!(buf, [0b1111_0000, 0b0000_0011]);
        write_bits(&mut buf, 5, 2, 0).unwrap();
        assert_eq!(buf, [0b1001_0000, 0b0000_0011]);
    }

    #[test]
    fn test_window_out_of_bounds() {
        let data = [0u8; 1];
        assert_eq!(
            read_bits(&data, 4, 5).unwrap_err(),
            BitError::OutOfBounds {
                start: 4,
                length: 5,
                bits: 8
            }
        );
        assert_eq!(
            read_bits(&[0u8; 16], 0, 65).unwrap_err(),
            BitError::TooWide { length: 65 }
        );
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4).unwrap(), 0);
        assert_eq!(align_up(5, 4).unwrap(), 8);
        assert_eq!(align_up(8, 8).unwrap(), 8);
        assert_eq!(align_up(0x1001, 0x1000).unwrap(), 0x2000);
        assert_eq!(
            align_up(3, 6).unwrap_err(),
            BitError::AlignmentNotPowerOfTwo { alignment: 6 }
        );
        assert_eq!(
            align_up(1, 0).unwrap_err(),
            BitError::AlignmentNotPowerOfTwo { alignment: 0 }
        );
        assert!(align_up(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_padding_needed() {
        assert_eq!(padding_needed(13, 4).unwrap(), 3);
        assert_eq!(padding_needed(16, 16).unwrap(), 0);
    }

    #[test]
    fn test_value_to_le_bytes() {
        assert_eq!(value_to_le_bytes(0x1234, 4), vec![0x34, 0x12, 0, 0]);
        assert_eq!(value_to_le_bytes(0x1234, 1), vec![0x34]);
    }
}
