use thiserror::Error;

use crate::varint::{self, MAX_VARINT_LEN};

/// Error returned when a write would exceed the buffer's byte limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("write would exceed bit buffer byte limit")]
pub struct BufferFull;

/// Error returned by [`BitReader`] when the input cannot satisfy a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The read needs more bits than remain in the stream.
    #[error("unexpected end of bit stream")]
    UnexpectedEof,
    /// A varint ran past 10 bytes or does not fit in a `u64`.
    #[error("varint overflows a u64")]
    VarintOverflow,
}

/// A growable bit buffer that supports writing individual bits, multi-bit
/// values, whole bytes and varints. This is the sink every frame is appended to.
///
/// An optional byte limit can be set to cap memory usage. When the limit is
/// reached, write operations return `Err(BufferFull)` instead of growing.
#[derive(Debug, Clone)]
pub struct BitBuffer {
    bytes: Vec<u8>,
    /// Number of valid bits in the last byte (1..=8, or 0 if empty).
    bit_count: u8,
    /// Maximum number of bytes the buffer is allowed to hold (`None` = unlimited).
    max_bytes: Option<usize>,
}

impl BitBuffer {
    /// Creates a new empty `BitBuffer` with no size limit.
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bit_count: 0,
            max_bytes: None,
        }
    }

    /// Creates a `BitBuffer` with the given pre-allocated capacity in bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            bit_count: 0,
            max_bytes: None,
        }
    }

    /// Creates a `BitBuffer` with a maximum byte limit.
    ///
    /// Once the buffer contains `max_bytes` bytes, further writes that would
    /// require a new byte return `Err(BufferFull)`.
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(max_bytes.min(128)),
            bit_count: 0,
            max_bytes: Some(max_bytes),
        }
    }

    /// Sets (or clears) the maximum byte limit on an existing buffer.
    pub fn set_limit(&mut self, max_bytes: Option<usize>) {
        self.max_bytes = max_bytes;
    }

    /// Returns the current byte limit, if any.
    pub fn limit(&self) -> Option<usize> {
        self.max_bytes
    }

    /// Creates a `BitBuffer` from raw bytes and total bit length.
    ///
    /// Bits past `total_bits` in the last byte are cleared so that later
    /// writes can OR into them.
    pub fn from_raw(mut bytes: Vec<u8>, total_bits: usize) -> Self {
        let needed = total_bits.div_ceil(8);
        debug_assert!(needed <= bytes.len(), "total_bits exceeds bytes length");
        bytes.truncate(needed);
        let remaining = (total_bits % 8) as u8;
        if remaining != 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= !(0xFFu8 >> remaining);
            }
        }
        Self {
            bit_count: if bytes.is_empty() {
                0
            } else if remaining == 0 {
                8
            } else {
                remaining
            },
            bytes,
            max_bytes: None,
        }
    }

    /// Returns the total number of bits written.
    #[inline]
    pub fn len_bits(&self) -> usize {
        if self.bytes.is_empty() {
            0
        } else {
            (self.bytes.len() - 1) * 8 + self.bit_count as usize
        }
    }

    /// Returns `true` if no bits have been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns a reference to the underlying byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the buffer and returns the raw byte vector.
    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Discards every bit past `len_bits`. Does nothing if the buffer is
    /// already that short.
    pub fn truncate(&mut self, len_bits: usize) {
        if len_bits >= self.len_bits() {
            return;
        }
        self.bytes.truncate(len_bits.div_ceil(8));
        let remaining = (len_bits % 8) as u8;
        if remaining == 0 {
            self.bit_count = if self.bytes.is_empty() { 0 } else { 8 };
        } else {
            if let Some(last) = self.bytes.last_mut() {
                *last &= !(0xFFu8 >> remaining);
            }
            self.bit_count = remaining;
        }
    }

    /// Writes a single bit.
    ///
    /// Returns `Err(BufferFull)` if adding a new byte would exceed the limit.
    #[inline]
    pub fn write_bit(&mut self, bit: bool) -> Result<(), BufferFull> {
        if self.bit_count == 0 || self.bit_count == 8 {
            if let Some(max) = self.max_bytes {
                if self.bytes.len() >= max {
                    return Err(BufferFull);
                }
            }
            self.bytes.push(0);
            self.bit_count = 0;
        }
        if bit {
            if let Some(last) = self.bytes.last_mut() {
                *last |= 1 << (7 - self.bit_count);
            }
        }
        self.bit_count += 1;
        Ok(())
    }

    /// Writes the lowest `n` bits of `value` (big-endian order). `n` must be <= 64.
    ///
    /// Returns `Err(BufferFull)` if writing would exceed the limit. On error the
    /// buffer may contain a partial write; callers that need atomicity record
    /// `len_bits()` first and `truncate` back to it.
    pub fn write_bits(&mut self, value: u64, n: u8) -> Result<(), BufferFull> {
        debug_assert!(n <= 64);
        if n == 0 {
            return Ok(());
        }
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 == 1)?;
        }
        Ok(())
    }

    /// Writes a run of bytes. The run does not need to be byte-aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BufferFull> {
        if self.bit_count == 0 || self.bit_count == 8 {
            if let Some(max) = self.max_bytes {
                if self.bytes.len() + bytes.len() > max {
                    return Err(BufferFull);
                }
            }
            self.bytes.extend_from_slice(bytes);
            if !self.bytes.is_empty() {
                self.bit_count = 8;
            }
            return Ok(());
        }
        for &b in bytes {
            self.write_bits(b as u64, 8)?;
        }
        Ok(())
    }

    /// Writes `x` as a little-endian base-128 varint.
    pub fn write_varint(&mut self, x: u64) -> Result<(), BufferFull> {
        let mut scratch = [0u8; MAX_VARINT_LEN];
        let len = varint::put_uvarint(&mut scratch, x);
        self.write_bytes(&scratch[..len])
    }

    /// Returns the number of bytes that can still be added before hitting the
    /// limit, or `None` if no limit is set.
    pub fn remaining_capacity(&self) -> Option<usize> {
        self.max_bytes.map(|max| max.saturating_sub(self.bytes.len()))
    }
}

impl Default for BitBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A cursor for reading bits sequentially from a `BitBuffer` or raw bytes.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    /// Total number of valid bits.
    total_bits: usize,
    /// Current bit position (0-indexed from the start).
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a new `BitReader` over the given buffer.
    pub fn new(buffer: &'a BitBuffer) -> Self {
        Self {
            bytes: buffer.as_bytes(),
            total_bits: buffer.len_bits(),
            pos: 0,
        }
    }

    /// Creates a `BitReader` from raw bytes and a total bit count.
    ///
    /// `total_bits` is clamped to the number of bits actually present.
    pub fn from_raw(bytes: &'a [u8], total_bits: usize) -> Self {
        Self {
            bytes,
            total_bits: total_bits.min(bytes.len() * 8),
            pos: 0,
        }
    }

    /// Returns the current bit position.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the number of bits remaining.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.total_bits.saturating_sub(self.pos)
    }

    /// Returns `true` if there are no more bits to read.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.total_bits
    }

    /// Reads a single bit.
    #[inline]
    pub fn read_bit(&mut self) -> Result<bool, ReadError> {
        let bit = self.peek_bit()?;
        self.pos += 1;
        Ok(bit)
    }

    /// Reads `n` bits as a `u64` (big-endian). `n` must be <= 64.
    ///
    /// Nothing is consumed if fewer than `n` bits remain.
    pub fn read_bits(&mut self, n: u8) -> Result<u64, ReadError> {
        debug_assert!(n <= 64);
        if n == 0 {
            return Ok(0);
        }
        if self.remaining() < n as usize {
            return Err(ReadError::UnexpectedEof);
        }
        let mut value: u64 = 0;
        for _ in 0..n {
            value = (value << 1) | (self.read_bit()? as u64);
        }
        Ok(value)
    }

    /// Reads `n` whole bytes, not necessarily byte-aligned.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
        if self.remaining() / 8 < n {
            return Err(ReadError::UnexpectedEof);
        }
        if self.pos % 8 == 0 {
            let start = self.pos / 8;
            self.pos += n * 8;
            return Ok(self.bytes[start..start + n].to_vec());
        }
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.read_bits(8)? as u8);
        }
        Ok(out)
    }

    /// Reads a little-endian base-128 varint written by
    /// [`BitBuffer::write_varint`].
    pub fn read_varint(&mut self) -> Result<u64, ReadError> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_bits(8)? as u8;
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(ReadError::VarintOverflow);
            }
            value |= ((byte & 0x7F) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ReadError::VarintOverflow)
    }

    /// Peeks at the next bit without advancing the position.
    #[inline]
    pub fn peek_bit(&self) -> Result<bool, ReadError> {
        if self.pos >= self.total_bits {
            return Err(ReadError::UnexpectedEof);
        }
        let byte_idx = self.pos / 8;
        let bit_idx = self.pos % 8;
        Ok((self.bytes[byte_idx] >> (7 - bit_idx)) & 1 == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_bits() {
        let mut buf = BitBuffer::new();
        buf.write_bit(true).unwrap();
        buf.write_bit(false).unwrap();
        buf.write_bit(true).unwrap();
        buf.write_bit(true).unwrap();
        assert_eq!(buf.len_bits(), 4);

        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.read_bit(), Ok(true));
        assert_eq!(reader.read_bit(), Ok(false));
        assert_eq!(reader.read_bit(), Ok(true));
        assert_eq!(reader.read_bit(), Ok(true));
        assert_eq!(reader.read_bit(), Err(ReadError::UnexpectedEof));
    }

    #[test]
    fn test_write_and_read_multi_bits() {
        let mut buf = BitBuffer::new();
        buf.write_bits(0b11010, 5).unwrap();
        buf.write_bits(0xFF, 8).unwrap();
        buf.write_bits(0x00, 8).unwrap();
        assert_eq!(buf.len_bits(), 21);

        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.read_bits(5), Ok(0b11010));
        assert_eq!(reader.read_bits(8), Ok(0xFF));
        assert_eq!(reader.read_bits(8), Ok(0x00));
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_64_bit_value() {
        let mut buf = BitBuffer::new();
        let val: u64 = 0xDEAD_BEEF_CAFE_BABE;
        buf.write_bits(val, 64).unwrap();
        assert_eq!(buf.len_bits(), 64);

        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.read_bits(64), Ok(val));
    }

    #[test]
    fn test_short_read_consumes_nothing() {
        let mut buf = BitBuffer::new();
        buf.write_bits(0b101, 3).unwrap();
        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.read_bits(4), Err(ReadError::UnexpectedEof));
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_bits(3), Ok(0b101));
    }

    #[test]
    fn test_unaligned_bytes() {
        let mut buf = BitBuffer::new();
        buf.write_bit(true).unwrap();
        buf.write_bytes(&[0xAB, 0xCD, 0x01]).unwrap();
        assert_eq!(buf.len_bits(), 25);

        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.read_bit(), Ok(true));
        assert_eq!(reader.read_bytes(3), Ok(vec![0xAB, 0xCD, 0x01]));
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_aligned_bytes_fast_path() {
        let mut buf = BitBuffer::new();
        buf.write_bytes(&[1, 2, 3]).unwrap();
        buf.write_bit(true).unwrap();
        assert_eq!(buf.len_bits(), 25);
        assert_eq!(buf.as_bytes(), &[1, 2, 3, 0x80]);

        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.read_bytes(3), Ok(vec![1, 2, 3]));
        assert_eq!(reader.read_bytes(1), Err(ReadError::UnexpectedEof));
    }

    #[test]
    fn test_varint_unaligned() {
        let mut buf = BitBuffer::new();
        buf.write_bits(0b11, 2).unwrap();
        buf.write_varint(300).unwrap();
        buf.write_varint(u64::MAX).unwrap();
        buf.write_varint(0).unwrap();
        // 2 bits + 2 bytes + 10 bytes + 1 byte
        assert_eq!(buf.len_bits(), 2 + 13 * 8);

        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.read_bits(2), Ok(0b11));
        assert_eq!(reader.read_varint(), Ok(300));
        assert_eq!(reader.read_varint(), Ok(u64::MAX));
        assert_eq!(reader.read_varint(), Ok(0));
    }

    #[test]
    fn test_varint_overflow() {
        let mut buf = BitBuffer::new();
        buf.write_bytes(&[0xFF; 10]).unwrap();
        buf.write_bytes(&[0x01]).unwrap();
        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.read_varint(), Err(ReadError::VarintOverflow));
    }

    #[test]
    fn test_truncate() {
        let mut buf = BitBuffer::new();
        buf.write_bits(0b1011, 4).unwrap();
        let mark = buf.len_bits();
        buf.write_bits(0xFFFF, 16).unwrap();
        buf.truncate(mark);
        assert_eq!(buf.len_bits(), 4);
        assert_eq!(buf.as_bytes(), &[0b1011_0000]);

        buf.write_bits(0b0101, 4).unwrap();
        assert_eq!(buf.as_bytes(), &[0b1011_0101]);

        buf.truncate(0);
        assert!(buf.is_empty());
        assert_eq!(buf.len_bits(), 0);
    }

    #[test]
    fn test_from_raw_masks_tail() {
        let buf = BitBuffer::from_raw(vec![0xFF, 0xFF], 12);
        assert_eq!(buf.len_bits(), 12);
        assert_eq!(buf.as_bytes(), &[0xFF, 0xF0]);
    }

    #[test]
    fn test_empty_buffer() {
        let buf = BitBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.len_bits(), 0);

        let mut reader = BitReader::new(&buf);
        assert!(reader.is_exhausted());
        assert_eq!(reader.read_bit(), Err(ReadError::UnexpectedEof));
    }

    #[test]
    fn test_with_limit_rejects_overflow() {
        let mut buf = BitBuffer::with_limit(1);
        buf.write_bits(0xFF, 8).unwrap();
        // The 9th bit requires a second byte.
        assert_eq!(buf.write_bit(true), Err(BufferFull));
        assert_eq!(buf.len_bits(), 8);
        assert_eq!(buf.write_bytes(&[1]), Err(BufferFull));
        assert_eq!(buf.remaining_capacity(), Some(0));
    }

    #[test]
    fn test_set_limit() {
        let mut buf = BitBuffer::new();
        assert_eq!(buf.limit(), None);
        buf.set_limit(Some(4));
        assert_eq!(buf.limit(), Some(4));
        buf.write_bits(0xDEADBEEF, 32).unwrap();
        assert!(buf.write_bit(true).is_err());
        buf.set_limit(None);
        buf.write_bit(true).unwrap();
    }
}
