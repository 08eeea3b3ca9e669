//! AMF3 variable length 29-bit integers.
//!
//! https://github.com/q191201771/doc/blob/master/spec-amf-file-format-spec.pdf
//! Check amf3 spec sections 1.3.1 and 3.6 to learn more about how this serialization works.
//! The first three bytes carry 7 bits each and a continuation flag, the fourth byte carries
//! all 8 bits.

use bytes::{Buf, BufMut};

use crate::{DecodingError, EncodingError};

pub const U29_MAX: u32 = (1 << 29) - 1;
pub const U28_MAX: u32 = (1 << 28) - 1;

pub const I29_MAX: i32 = (1 << 28) - 1;
pub const I29_MIN: i32 = -(1 << 28);

const ONE_BYTE_MAX: u32 = (1 << 7) - 1;
const TWO_BYTE_MAX: u32 = (1 << 14) - 1;
const THREE_BYTE_MAX: u32 = (1 << 21) - 1;

/// Reads an unsigned U29.
pub fn read_u29<B: Buf>(buf: &mut B) -> Result<u32, DecodingError> {
    let mut result: u32 = 0;

    for _ in 0..3 {
        let byte = next_byte(buf)?;
        result = (result << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }

    let byte = next_byte(buf)?;
    Ok((result << 8) | u32::from(byte))
}

/// Reads a U29 and reinterprets it as a two's complement 29-bit signed integer.
pub fn read_i29<B: Buf>(buf: &mut B) -> Result<i32, DecodingError> {
    read_u29(buf).map(u29_to_i29)
}

pub fn u29_to_i29(u29: u32) -> i32 {
    if u29 & (1 << 28) != 0 {
        (u29 as i32) - (1 << 29)
    } else {
        u29 as i32
    }
}

fn next_byte<B: Buf>(buf: &mut B) -> Result<u8, DecodingError> {
    if !buf.has_remaining() {
        return Err(DecodingError::MalformedInteger);
    }
    Ok(buf.get_u8())
}

/// Number of bytes `write_u29` emits for `u29`.
pub fn u29_len(u29: u32) -> Result<usize, EncodingError> {
    match u29 {
        n if n <= ONE_BYTE_MAX => Ok(1),
        n if n <= TWO_BYTE_MAX => Ok(2),
        n if n <= THREE_BYTE_MAX => Ok(3),
        n if n <= U29_MAX => Ok(4),
        n => Err(EncodingError::OutOfRangeU29(n as usize)),
    }
}

/// Writes `u29` using the minimal number of bytes.
pub fn write_u29<B: BufMut>(buf: &mut B, u29: u32) -> Result<(), EncodingError> {
    match u29_len(u29)? {
        1 => buf.put_u8(u29 as u8),
        2 => buf.put_slice(&[0x80 | (u29 >> 7) as u8, (u29 & 0x7F) as u8]),
        3 => buf.put_slice(&[
            0x80 | (u29 >> 14) as u8,
            0x80 | ((u29 >> 7) & 0x7F) as u8,
            (u29 & 0x7F) as u8,
        ]),
        _ => buf.put_slice(&[
            0x80 | (u29 >> 22) as u8,
            0x80 | ((u29 >> 15) & 0x7F) as u8,
            0x80 | ((u29 >> 8) & 0x7F) as u8,
            (u29 & 0xFF) as u8,
        ]),
    }
    Ok(())
}

/// Writes a signed integer in the 29-bit range. Values outside of it are rejected, the
/// encoder is responsible for falling back to a double.
pub fn write_i29<B: BufMut>(buf: &mut B, i29: i32) -> Result<(), EncodingError> {
    if !(I29_MIN..=I29_MAX).contains(&i29) {
        return Err(EncodingError::OutOfRangeInteger(i29));
    }
    write_u29(buf, (i29 as u32) & U29_MAX)
}

#[cfg(test)]
mod u29_test {
    use bytes::{Buf, Bytes, BytesMut};

    use super::*;

    fn encode(u29: u32) -> Bytes {
        let mut buf = BytesMut::new();
        write_u29(&mut buf, u29).unwrap();
        buf.freeze()
    }

    #[test]
    fn test_decode_u29() {
        let mut buf = Bytes::from_iter([0b01101001]);
        assert_eq!(read_u29(&mut buf).unwrap(), 105);

        let mut buf = Bytes::from_iter([0b10010000, 0b01011001]);
        assert_eq!(read_u29(&mut buf).unwrap(), 2137);

        let mut buf = Bytes::from_iter([0b10111101, 0b10010101, 0b00011001]);
        assert_eq!(read_u29(&mut buf).unwrap(), 1_002_137);

        let mut buf = Bytes::from_iter([0b10000101, 0b10001100, 0b10011100, 0b11101001]);
        assert_eq!(read_u29(&mut buf).unwrap(), 21_372_137);
    }

    #[test]
    fn test_decode_i29_negative() {
        let mut buf = Bytes::from_iter([0b11111111, 0b11111111, 0b11110111, 0b10100111]);
        assert_eq!(read_i29(&mut buf).unwrap(), -2137);

        let mut buf = Bytes::from_iter([0b11000000, 0b10000000, 0b10000000, 0b00000000]);
        assert_eq!(read_i29(&mut buf).unwrap(), -(1 << 28));
    }

    #[test]
    fn test_boundaries() {
        let cases: [(u32, &[u8]); 9] = [
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x81, 0x00]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x81, 0x80, 0x00]),
            (2_097_151, &[0xFF, 0xFF, 0x7F]),
            (2_097_152, &[0x80, 0xC0, 0x80, 0x00]),
            (I29_MAX as u32, &[0xBF, 0xFF, 0xFF, 0xFF]),
            (U29_MAX, &[0xFF, 0xFF, 0xFF, 0xFF]),
        ];

        for (value, expected) in cases {
            let encoded = encode(value);
            assert_eq!(encoded.as_ref(), expected, "encoding {value}");
            assert_eq!(u29_len(value).unwrap(), expected.len());

            let mut buf = encoded;
            assert_eq!(read_u29(&mut buf).unwrap(), value, "decoding {value}");
            assert!(!buf.has_remaining());
        }
    }

    #[test]
    fn test_signed_boundaries() {
        for value in [I29_MIN, -1, 0, 1, I29_MAX] {
            let mut buf = BytesMut::new();
            write_i29(&mut buf, value).unwrap();
            let mut buf = buf.freeze();
            assert_eq!(read_i29(&mut buf).unwrap(), value);
        }

        let mut buf = BytesMut::new();
        write_i29(&mut buf, I29_MIN).unwrap();
        assert_eq!(buf.as_ref(), &[0xC0, 0x80, 0x80, 0x00]);
    }

    #[test]
    fn test_out_of_range() {
        let mut buf = BytesMut::new();
        assert_eq!(
            write_u29(&mut buf, U29_MAX + 1),
            Err(EncodingError::OutOfRangeU29((U29_MAX + 1) as usize))
        );
        assert_eq!(
            write_i29(&mut buf, I29_MAX + 1),
            Err(EncodingError::OutOfRangeInteger(I29_MAX + 1))
        );
        assert_eq!(
            write_i29(&mut buf, I29_MIN - 1),
            Err(EncodingError::OutOfRangeInteger(I29_MIN - 1))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncated() {
        let cases: [&[u8]; 4] = [&[], &[0x80], &[0xFF, 0xFF], &[0xFF, 0xFF, 0xFF]];
        for bytes in cases {
            let mut buf = Bytes::copy_from_slice(bytes);
            assert_eq!(read_u29(&mut buf), Err(DecodingError::MalformedInteger));
        }
    }

    #[test]
    fn test_fourth_byte_terminates() {
        // A fifth byte is never part of the integer.
        let mut buf = Bytes::from_iter([0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert_eq!(read_u29(&mut buf).unwrap(), U29_MAX);
        assert_eq!(buf.remaining(), 1);
    }
}
