//! Per-field XOR float compression (Gorilla / TSZ).
//!
//! | case                         | bits                                   |
//! |------------------------------|----------------------------------------|
//! | first value                  | 64 raw bits                            |
//! | xor == 0                     | `0`                                    |
//! | fits in the previous window  | `10` + significant bits                |
//! | new window                   | `11` + 5-bit leading + 6-bit (len - 1) + significant bits |

use crate::bitbuffer::{BitBuffer, BitReader, BufferFull};
use crate::error::{Error, Result};
use crate::schema::{FloatWidth, NumericField};
use crate::value::Value;

const LEADING_BITS: u8 = 5;
const SIGNIFICANT_BITS: u8 = 6;
/// Largest leading-zero count the 5-bit header can carry.
const MAX_LEADING: u8 = (1 << LEADING_BITS) - 1;
/// Window sentinel: no window has been established.
const NO_WINDOW: u8 = 64;

/// Compression state for one numeric field of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TszFieldState {
    field: u32,
    width: FloatWidth,
    initialized: bool,
    /// Raw bits of the last value.
    prev_bits: u64,
    /// Last XOR written (the raw bits for the first value).
    prev_xor: u64,
    /// Leading zeros of the current window, or `NO_WINDOW`.
    leading: u8,
    /// Trailing zeros of the current window, or `NO_WINDOW`.
    trailing: u8,
}

impl TszFieldState {
    pub fn new(field: NumericField) -> Self {
        Self {
            field: field.number,
            width: field.width,
            initialized: false,
            prev_bits: 0,
            prev_xor: 0,
            leading: NO_WINDOW,
            trailing: NO_WINDOW,
        }
    }

    pub fn field(&self) -> u32 {
        self.field
    }

    pub fn width(&self) -> FloatWidth {
        self.width
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Raw 64-bit pattern of the last processed value.
    pub fn prev_bits(&self) -> u64 {
        self.prev_bits
    }

    pub fn prev_xor(&self) -> u64 {
        self.prev_xor
    }

    /// Appends `bits` to `buf`.
    pub fn encode(&mut self, bits: u64, buf: &mut BitBuffer) -> Result<(), BufferFull> {
        if !self.initialized {
            buf.write_bits(bits, 64)?;
            self.first(bits);
            return Ok(());
        }

        let xor = self.prev_bits ^ bits;
        if xor == 0 {
            buf.write_bit(false)?;
        } else {
            buf.write_bit(true)?;
            let (leading, trailing) = window_of(xor);
            if leading >= self.leading && trailing >= self.trailing {
                buf.write_bit(false)?;
                let significant = 64 - self.leading - self.trailing;
                buf.write_bits((xor >> self.trailing) & bitmask(significant), significant)?;
            } else {
                buf.write_bit(true)?;
                let significant = 64 - leading - trailing;
                buf.write_bits(leading as u64, LEADING_BITS)?;
                buf.write_bits((significant - 1) as u64, SIGNIFICANT_BITS)?;
                buf.write_bits((xor >> trailing) & bitmask(significant), significant)?;
                self.leading = leading;
                self.trailing = trailing;
            }
        }
        self.prev_xor = xor;
        self.prev_bits = bits;
        Ok(())
    }

    /// Reads the next value's raw bits from `reader`.
    pub fn decode(&mut self, reader: &mut BitReader<'_>) -> Result<u64> {
        if !self.initialized {
            let bits = reader.read_bits(64)?;
            self.first(bits);
            return Ok(bits);
        }

        if !reader.read_bit()? {
            self.prev_xor = 0;
            return Ok(self.prev_bits);
        }

        let xor = if !reader.read_bit()? {
            if self.leading == NO_WINDOW {
                return Err(Error::corrupt(
                    reader.position(),
                    format!("field {} reuses a window that was never set", self.field),
                ));
            }
            let significant = 64 - self.leading - self.trailing;
            reader.read_bits(significant)? << self.trailing
        } else {
            let leading = reader.read_bits(LEADING_BITS)? as u8;
            let significant = reader.read_bits(SIGNIFICANT_BITS)? as u8 + 1;
            if leading + significant > 64 {
                return Err(Error::corrupt(
                    reader.position(),
                    format!(
                        "field {} window of {} leading and {} significant bits exceeds 64",
                        self.field, leading, significant
                    ),
                ));
            }
            let trailing = 64 - leading - significant;
            self.leading = leading;
            self.trailing = trailing;
            reader.read_bits(significant)? << trailing
        };

        self.prev_xor = xor;
        self.prev_bits ^= xor;
        Ok(self.prev_bits)
    }

    fn first(&mut self, bits: u64) {
        self.initialized = true;
        self.prev_bits = bits;
        self.prev_xor = bits;
        if bits != 0 {
            (self.leading, self.trailing) = window_of(bits);
        }
    }
}

/// Leading zeros (clamped to what the header can carry) and trailing zeros.
#[inline]
fn window_of(xor: u64) -> (u8, u8) {
    let leading = (xor.leading_zeros() as u8).min(MAX_LEADING);
    let trailing = xor.trailing_zeros() as u8;
    (leading, trailing)
}

/// Returns a bitmask with the lowest `n` bits set. Handles `n == 64` without overflow.
#[inline]
fn bitmask(n: u8) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

/// Widens an `f32` to f64 bits without changing its value.
///
/// NaNs are widened by moving the payload bits directly so that signalling
/// NaNs keep their exact pattern.
pub fn widen_f32(v: f32) -> u64 {
    if v.is_nan() {
        let bits = v.to_bits() as u64;
        let sign = (bits >> 31) << 63;
        let payload = (bits & 0x007F_FFFF) << 29;
        sign | 0x7FF0_0000_0000_0000 | payload
    } else {
        (v as f64).to_bits()
    }
}

/// Inverse of [`widen_f32`].
pub fn narrow_f64(bits: u64) -> f32 {
    let v = f64::from_bits(bits);
    if v.is_nan() {
        let sign = ((bits >> 63) as u32) << 31;
        let payload = ((bits >> 29) & 0x007F_FFFF) as u32;
        f32::from_bits(sign | 0x7F80_0000 | payload)
    } else {
        v as f32
    }
}

/// Converts a decoded bit pattern to the field's value type.
pub fn value_from_bits(width: FloatWidth, bits: u64) -> Value {
    match width {
        FloatWidth::F64 => Value::Double(f64::from_bits(bits)),
        FloatWidth::F32 => Value::Float(narrow_f64(bits)),
    }
}
