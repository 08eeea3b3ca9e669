use std::io::SeekFrom;

use bytes::{Buf, Bytes, BytesMut};

use crate::StreamError;

const U24_MAX: u32 = 0xFF_FF_FF;
const I24_MAX: i32 = 0x7F_FF_FF;
const I24_MIN: i32 = -0x80_00_00;

/// Byte order used by the numeric readers and writers of [`BufferedByteStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Network byte order.
    #[default]
    Big,
    Little,
}

impl Endian {
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

/// Seekable read-write byte buffer with a cursor.
///
/// Reading past the end fails instead of returning short data. Writes happen at the
/// cursor, overwriting existing bytes and growing the buffer when needed. Implements
/// [`Buf`] so an [`crate::Amf3Decoder`] can consume it directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedByteStream {
    buf: BytesMut,
    pos: usize,
    endian: Endian,
}

impl BufferedByteStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Moves the cursor. Seeking past the end is allowed, the next write fills the gap
    /// with zeros.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<usize, StreamError> {
        let target = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset).ok(),
            SeekFrom::End(offset) => offset_from(self.buf.len(), offset),
            SeekFrom::Current(offset) => offset_from(self.pos, offset),
        };
        self.pos = target
            .and_then(|target| usize::try_from(target).ok())
            .ok_or(StreamError::InvalidSeek(pos))?;
        Ok(self.pos)
    }

    pub fn at_eof(&self) -> bool {
        !self.has_remaining()
    }

    /// Looks up to `size` bytes ahead without moving the cursor.
    pub fn peek(&self, size: usize) -> &[u8] {
        let chunk = self.chunk();
        &chunk[..size.min(chunk.len())]
    }

    /// Reads exactly `length` bytes.
    pub fn read(&mut self, length: usize) -> Result<Bytes, StreamError> {
        self.ensure(length)?;
        Ok(self.copy_to_bytes(length))
    }

    pub fn read_to_end(&mut self) -> Bytes {
        let remaining = self.remaining();
        self.copy_to_bytes(remaining)
    }

    /// Writes `data` at the cursor and moves the cursor past it.
    pub fn write(&mut self, data: &[u8]) {
        if self.pos > self.buf.len() {
            self.buf.resize(self.pos, 0);
        }
        let overlap = (self.buf.len() - self.pos).min(data.len());
        self.buf[self.pos..self.pos + overlap].copy_from_slice(&data[..overlap]);
        self.buf.extend_from_slice(&data[overlap..]);
        self.pos += data.len();
    }

    /// Appends `data` at the end of the buffer, leaving the cursor untouched.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Discards everything before the cursor and moves the cursor to the new start.
    pub fn consume(&mut self) {
        let consumed = self.pos.min(self.buf.len());
        self.buf.advance(consumed);
        self.pos = 0;
    }

    pub fn truncate(&mut self, size: usize) {
        self.buf.truncate(size);
        self.pos = self.pos.min(size);
    }

    pub fn get_value(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    pub fn read_uchar(&mut self) -> Result<u8, StreamError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn write_uchar(&mut self, c: u8) {
        self.write(&[c]);
    }

    pub fn read_char(&mut self) -> Result<i8, StreamError> {
        Ok(self.take::<1>()?[0] as i8)
    }

    pub fn write_char(&mut self, c: i8) {
        self.write(&[c as u8]);
    }

    pub fn read_ushort(&mut self) -> Result<u16, StreamError> {
        let bytes = self.take()?;
        Ok(match self.endian {
            Endian::Big => u16::from_be_bytes(bytes),
            Endian::Little => u16::from_le_bytes(bytes),
        })
    }

    pub fn write_ushort(&mut self, s: u16) {
        let bytes = match self.endian {
            Endian::Big => s.to_be_bytes(),
            Endian::Little => s.to_le_bytes(),
        };
        self.write(&bytes);
    }

    pub fn read_short(&mut self) -> Result<i16, StreamError> {
        let bytes = self.take()?;
        Ok(match self.endian {
            Endian::Big => i16::from_be_bytes(bytes),
            Endian::Little => i16::from_le_bytes(bytes),
        })
    }

    pub fn write_short(&mut self, s: i16) {
        let bytes = match self.endian {
            Endian::Big => s.to_be_bytes(),
            Endian::Little => s.to_le_bytes(),
        };
        self.write(&bytes);
    }

    pub fn read_ulong(&mut self) -> Result<u32, StreamError> {
        let bytes = self.take()?;
        Ok(match self.endian {
            Endian::Big => u32::from_be_bytes(bytes),
            Endian::Little => u32::from_le_bytes(bytes),
        })
    }

    pub fn write_ulong(&mut self, l: u32) {
        let bytes = match self.endian {
            Endian::Big => l.to_be_bytes(),
            Endian::Little => l.to_le_bytes(),
        };
        self.write(&bytes);
    }

    pub fn read_long(&mut self) -> Result<i32, StreamError> {
        let bytes = self.take()?;
        Ok(match self.endian {
            Endian::Big => i32::from_be_bytes(bytes),
            Endian::Little => i32::from_le_bytes(bytes),
        })
    }

    pub fn write_long(&mut self, l: i32) {
        let bytes = match self.endian {
            Endian::Big => l.to_be_bytes(),
            Endian::Little => l.to_le_bytes(),
        };
        self.write(&bytes);
    }

    pub fn read_24bit_uint(&mut self) -> Result<u32, StreamError> {
        let [a, b, c] = self.take()?;
        Ok(match self.endian {
            Endian::Big => u32::from_be_bytes([0, a, b, c]),
            Endian::Little => u32::from_le_bytes([a, b, c, 0]),
        })
    }

    pub fn write_24bit_uint(&mut self, n: u32) -> Result<(), StreamError> {
        if n > U24_MAX {
            return Err(StreamError::OutOfRange {
                kind: "24bit uint",
                value: n.into(),
            });
        }
        let bytes = match self.endian {
            Endian::Big => {
                let [_, a, b, c] = n.to_be_bytes();
                [a, b, c]
            }
            Endian::Little => {
                let [a, b, c, _] = n.to_le_bytes();
                [a, b, c]
            }
        };
        self.write(&bytes);
        Ok(())
    }

    pub fn read_24bit_int(&mut self) -> Result<i32, StreamError> {
        let n = self.read_24bit_uint()?;
        if n & 0x80_00_00 != 0 {
            Ok(n as i32 - 0x1_00_00_00)
        } else {
            Ok(n as i32)
        }
    }

    pub fn write_24bit_int(&mut self, n: i32) -> Result<(), StreamError> {
        if !(I24_MIN..=I24_MAX).contains(&n) {
            return Err(StreamError::OutOfRange {
                kind: "24bit int",
                value: n.into(),
            });
        }
        self.write_24bit_uint((n as u32) & U24_MAX)
    }

    pub fn read_double(&mut self) -> Result<f64, StreamError> {
        let bytes = self.take()?;
        Ok(match self.endian {
            Endian::Big => f64::from_be_bytes(bytes),
            Endian::Little => f64::from_le_bytes(bytes),
        })
    }

    pub fn write_double(&mut self, d: f64) {
        let bytes = match self.endian {
            Endian::Big => d.to_be_bytes(),
            Endian::Little => d.to_le_bytes(),
        };
        self.write(&bytes);
    }

    pub fn read_float(&mut self) -> Result<f32, StreamError> {
        let bytes = self.take()?;
        Ok(match self.endian {
            Endian::Big => f32::from_be_bytes(bytes),
            Endian::Little => f32::from_le_bytes(bytes),
        })
    }

    pub fn write_float(&mut self, f: f32) {
        let bytes = match self.endian {
            Endian::Big => f.to_be_bytes(),
            Endian::Little => f.to_le_bytes(),
        };
        self.write(&bytes);
    }

    pub fn read_utf8_string(&mut self, length: usize) -> Result<String, StreamError> {
        let bytes = self.read(length)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| StreamError::InvalidUtf8)
    }

    pub fn write_utf8_string(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    fn ensure(&self, length: usize) -> Result<(), StreamError> {
        let remaining = self.remaining();
        if remaining < length {
            return Err(StreamError::Eof {
                requested: length,
                remaining,
            });
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        self.ensure(N)?;
        let mut bytes = [0; N];
        self.copy_to_slice(&mut bytes);
        Ok(bytes)
    }
}

fn offset_from(base: usize, offset: i64) -> Option<i64> {
    i64::try_from(base).ok()?.checked_add(offset)
}

impl Buf for BufferedByteStream {
    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn chunk(&self) -> &[u8] {
        self.buf.get(self.pos..).unwrap_or_default()
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining(),
            "cannot advance past the end of the stream"
        );
        self.pos += cnt;
    }
}

impl From<Bytes> for BufferedByteStream {
    fn from(bytes: Bytes) -> Self {
        Self::from(bytes.as_ref())
    }
}

impl From<Vec<u8>> for BufferedByteStream {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            buf: BytesMut::from(&bytes[..]),
            ..Default::default()
        }
    }
}

impl From<&[u8]> for BufferedByteStream {
    fn from(bytes: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(bytes),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod stream_test {
    use std::io::SeekFrom;

    use bytes::Buf;

    use super::*;

    #[test]
    fn test_read_past_end() {
        let mut stream = BufferedByteStream::from(&b"abc"[..]);
        assert_eq!(stream.read(2).unwrap().as_ref(), b"ab");
        assert_eq!(
            stream.read(2),
            Err(StreamError::Eof {
                requested: 2,
                remaining: 1
            })
        );
        assert_eq!(stream.position(), 2);
        assert_eq!(stream.read_to_end().as_ref(), b"c");
        assert!(stream.at_eof());
    }

    #[test]
    fn test_peek_does_not_move() {
        let stream = BufferedByteStream::from(&b"spam"[..]);
        assert_eq!(stream.peek(2), b"sp");
        assert_eq!(stream.peek(10), b"spam");
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_write_overwrites_at_cursor() {
        let mut stream = BufferedByteStream::from(&b"abcd"[..]);
        stream.seek(SeekFrom::Start(2)).unwrap();
        stream.write(b"XYZ");
        assert_eq!(stream.get_value().as_ref(), b"abXYZ");
        assert_eq!(stream.position(), 5);

        stream.append(b"!");
        assert_eq!(stream.position(), 5);
        assert_eq!(stream.len(), 6);
    }

    #[test]
    fn test_seek() {
        let mut stream = BufferedByteStream::from(&b"abc"[..]);
        assert_eq!(stream.seek(SeekFrom::End(-1)), Ok(2));
        assert_eq!(stream.seek(SeekFrom::Current(-2)), Ok(0));
        assert_eq!(
            stream.seek(SeekFrom::Current(-1)),
            Err(StreamError::InvalidSeek(SeekFrom::Current(-1)))
        );
        assert_eq!(
            stream.seek(SeekFrom::End(i64::MAX)),
            Err(StreamError::InvalidSeek(SeekFrom::End(i64::MAX)))
        );
        assert_eq!(
            stream.seek(SeekFrom::Start(u64::MAX)),
            Err(StreamError::InvalidSeek(SeekFrom::Start(u64::MAX)))
        );
        assert_eq!(stream.position(), 0);

        stream.seek(SeekFrom::End(2)).unwrap();
        assert!(stream.at_eof());
        stream.write(b"d");
        assert_eq!(stream.get_value().as_ref(), b"abc\0\0d");
    }

    #[test]
    fn test_truncate() {
        let mut stream = BufferedByteStream::from(&b"abcdef"[..]);
        stream.seek(SeekFrom::End(0)).unwrap();
        stream.truncate(2);
        assert_eq!(stream.position(), 2);
        assert_eq!(stream.get_value().as_ref(), b"ab");

        stream.truncate(10);
        assert_eq!(stream.len(), 2);
    }

    #[test]
    fn test_native_endian() {
        let mut stream = BufferedByteStream::new().with_endian(Endian::native());
        stream.write_ulong(0x01020304);
        assert_eq!(stream.get_value().as_ref(), &0x01020304u32.to_ne_bytes());
    }

    #[test]
    fn test_consume() {
        let mut stream = BufferedByteStream::from(&b"abcdef"[..]);
        stream.read(4).unwrap();
        stream.consume();
        assert_eq!(stream.position(), 0);
        assert_eq!(stream.get_value().as_ref(), b"ef");
    }

    #[test]
    fn test_endianness() {
        let mut stream = BufferedByteStream::new();
        stream.write_ushort(0x0102);
        stream.set_endian(Endian::Little);
        stream.write_ushort(0x0102);
        stream.write_24bit_int(-2).unwrap();
        assert_eq!(
            stream.get_value().as_ref(),
            &[0x01, 0x02, 0x02, 0x01, 0xFE, 0xFF, 0xFF]
        );

        stream.seek(SeekFrom::Start(0)).unwrap();
        stream.set_endian(Endian::Big);
        assert_eq!(stream.read_ushort().unwrap(), 0x0102);
        stream.set_endian(Endian::Little);
        assert_eq!(stream.read_ushort().unwrap(), 0x0102);
        assert_eq!(stream.read_24bit_int().unwrap(), -2);
    }

    #[test]
    fn test_24bit_range() {
        let mut stream = BufferedByteStream::new();
        assert!(stream.write_24bit_uint(0x1_00_00_00).is_err());
        assert!(stream.write_24bit_int(0x80_00_00).is_err());
        assert!(stream.write_24bit_int(-0x80_00_01).is_err());
        assert!(stream.is_empty());

        stream.write_24bit_int(-0x80_00_00).unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(stream.read_24bit_int().unwrap(), -0x80_00_00);
    }

    #[test]
    fn test_numbers_round_trip() {
        let mut stream = BufferedByteStream::new();
        stream.write_double(0.1);
        stream.write_float(1.5);
        stream.write_long(-7);
        stream.write_ulong(7);
        stream.write_char(-1);
        stream.write_utf8_string("żółw");

        stream.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(stream.read_double().unwrap(), 0.1);
        assert_eq!(stream.read_float().unwrap(), 1.5);
        assert_eq!(stream.read_long().unwrap(), -7);
        assert_eq!(stream.read_ulong().unwrap(), 7);
        assert_eq!(stream.read_char().unwrap(), -1);
        assert_eq!(stream.read_utf8_string(7).unwrap(), "żółw");
        assert_eq!(stream.remaining(), 0);
    }
}
