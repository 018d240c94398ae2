//! Little-endian base-128 varints and zig-zag mapping.
//!
//! Each byte carries 7 payload bits, least significant group first, with the
//! high bit set on every byte except the last.

use std::io::{self, ErrorKind::InvalidData};

use byteorder::ReadBytesExt;

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Writes `x` into the front of `buf` and returns the number of bytes used.
///
/// `buf` must be at least [`MAX_VARINT_LEN`] bytes long.
pub fn put_uvarint(buf: &mut [u8], mut x: u64) -> usize {
    let mut i = 0;
    while x >= 0x80 {
        buf[i] = (x as u8) | 0x80;
        x >>= 7;
        i += 1;
    }
    buf[i] = x as u8;
    i + 1
}

/// Appends `x` to `buf`.
pub fn write_uvarint(buf: &mut Vec<u8>, x: u64) {
    let mut scratch = [0u8; MAX_VARINT_LEN];
    let len = put_uvarint(&mut scratch, x);
    buf.extend_from_slice(&scratch[..len]);
}

/// Reads a varint from the front of `buf`, advancing it.
pub fn read_uvarint(buf: &mut &[u8]) -> io::Result<u64> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = buf.read_u8()?;
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(io::Error::new(InvalidData, "varint overflows a u64"));
        }
        value |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(io::Error::new(InvalidData, "varint overflows a u64"))
}

/// Number of bytes `x` occupies once encoded.
pub fn uvarint_len(x: u64) -> usize {
    let bits = 64 - (x | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

#[inline]
pub fn zigzag_encode64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline]
pub fn zigzag_decode64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

#[inline]
pub fn zigzag_encode32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

#[inline]
pub fn zigzag_decode32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}
