use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::bitbuffer::{BitBuffer, BufferFull};
use crate::config::EncoderConfig;
use crate::error::{Error, Result};
use crate::schema::{FieldType, FloatWidth, NumericField, Schema};
use crate::state::StreamState;
use crate::tsz::{widen_f32, TszFieldState};
use crate::value::{Message, StructuredValue, Value};
use crate::wire;

/// The stream encoder.
///
/// Each call to [`encode`](Encoder::encode) appends one frame:
/// - **Numeric fields** (`double`/`float`): XOR compressed against the
///   previous value of the same field, in schema order.
/// - **General fields**: a `0` bit when none changed, otherwise `1`, a bitmap
///   of changed field numbers and the changed fields in protobuf wire form.
///
/// # Example
/// ```
/// use msgtsz::{Encoder, FieldDescriptor, FieldType, Message, Schema};
///
/// let schema = Schema::new("reading", vec![
///     FieldDescriptor::new(1, "value", FieldType::Double),
///     FieldDescriptor::new(2, "tag", FieldType::String),
/// ]).unwrap();
///
/// let mut encoder = Encoder::new(schema).unwrap();
/// encoder.encode(&Message::new().with(1, 10.0).with(2, "a")).unwrap();
/// encoder.encode(&Message::new().with(1, 10.0).with(2, "a")).unwrap();
///
/// let compressed = encoder.into_compressed();
/// assert_eq!(compressed.count, 2);
/// ```
pub struct Encoder {
    buf: BitBuffer,
    state: StreamState,
    /// Number of messages encoded so far.
    count: u64,
}

/// Everything one frame writes, computed before any bit is written.
struct Frame {
    numeric: Vec<u64>,
    general: Option<GeneralPayload>,
    snapshot: Message,
}

struct GeneralPayload {
    changed: Vec<u32>,
    bytes: Vec<u8>,
}

impl Encoder {
    /// Opens a new stream for `schema` with a default buffer.
    ///
    /// Fails with `UnsupportedSchema` if the schema has repeated, map or
    /// nested message fields.
    pub fn new(schema: impl Into<Arc<Schema>>) -> Result<Self> {
        Self::with_config(schema, &EncoderConfig::default())
    }

    /// Opens a new stream whose buffer follows `config`.
    pub fn with_config(schema: impl Into<Arc<Schema>>, config: &EncoderConfig) -> Result<Self> {
        Self::with_buffer(schema, config.buffer())
    }

    /// Opens a new stream that appends its frames to `buf`.
    ///
    /// A decoder for this stream must start at `buf.len_bits()` as it was
    /// when the stream was opened.
    pub fn with_buffer(schema: impl Into<Arc<Schema>>, buf: BitBuffer) -> Result<Self> {
        let state = StreamState::new(schema.into())?;
        debug!(
            schema = state.schema.name(),
            numeric_fields = state.partition.numeric.len(),
            general_fields = state.partition.general.len(),
            start_bit = buf.len_bits(),
            "Opened encoder stream"
        );
        Ok(Self {
            buf,
            state,
            count: 0,
        })
    }

    /// Encodes one message into the stream.
    ///
    /// The frame is all-or-nothing: on any error the buffer and the stream
    /// state are left exactly as they were, so the caller may retry.
    pub fn encode<M: StructuredValue + ?Sized>(&mut self, message: &M) -> Result<()> {
        let frame = self.prepare(message)?;

        let mark = self.buf.len_bits();
        let mut tsz = self.state.tsz.clone();
        if let Err(BufferFull) = write_frame(&mut self.buf, &mut tsz, &frame) {
            warn!(
                frame = self.count,
                written_bits = self.buf.len_bits() - mark,
                "Buffer limit reached mid-frame, rolling back"
            );
            self.buf.truncate(mark);
            return Err(Error::BufferFull);
        }

        trace!(
            frame = self.count,
            bits = self.buf.len_bits() - mark,
            changed = ?frame.general.as_ref().map(|g| &g.changed),
            payload_bytes = frame.general.as_ref().map_or(0, |g| g.bytes.len()),
            "Encoded frame"
        );
        self.state.tsz = tsz;
        self.state.last = Some(frame.snapshot);
        self.count += 1;
        Ok(())
    }

    /// Validates `message` and computes the frame contents.
    fn prepare<M: StructuredValue + ?Sized>(&self, message: &M) -> Result<Frame> {
        let schema = &self.state.schema;
        for number in message.field_numbers() {
            if !schema.contains(number) {
                return Err(Error::UnknownField { field: number });
            }
        }

        let numeric = self
            .state
            .partition
            .numeric
            .iter()
            .map(|field| numeric_bits(message, *field))
            .collect::<Result<Vec<_>>>()?;

        let snapshot: Message = self
            .state
            .partition
            .general
            .iter()
            .filter_map(|&number| message.get_field(number).map(|v| (number, v.into_owned())))
            .collect();
        wire::validate(&snapshot, schema)?;

        let changed: Vec<u32> = match &self.state.last {
            None => self.state.partition.general.clone(),
            Some(last) => self
                .state
                .partition
                .general
                .iter()
                .copied()
                .filter(|&number| last.get(number) != snapshot.get(number))
                .collect(),
        };

        let general = if changed.is_empty() && !self.state.is_first() {
            None
        } else {
            let partial: Message = changed
                .iter()
                .filter_map(|&number| snapshot.get(number).map(|v| (number, v.clone())))
                .collect();
            let bytes = wire::marshal(&partial, schema)?;
            Some(GeneralPayload { changed, bytes })
        };

        Ok(Frame {
            numeric,
            general,
            snapshot,
        })
    }

    /// Returns a reference to the underlying `BitBuffer`.
    pub fn buffer(&self) -> &BitBuffer {
        &self.buf
    }

    /// Consumes the encoder and returns the compressed `BitBuffer`.
    pub fn into_buffer(self) -> BitBuffer {
        self.buf
    }

    /// Consumes the encoder and returns the stream as bytes plus bit length.
    pub fn into_compressed(self) -> CompressedStream {
        CompressedStream {
            total_bits: self.buf.len_bits(),
            bytes: self.buf.into_bytes(),
            count: self.count,
        }
    }

    /// Returns the number of messages encoded so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.state.schema
    }
}

/// Fetches a numeric field as f64 bits.
///
/// A `double` field accepts `float` values (widened exactly); a `float`
/// field only accepts `float` values.
fn numeric_bits<M: StructuredValue + ?Sized>(message: &M, field: NumericField) -> Result<u64> {
    let value = message
        .get_field(field.number)
        .ok_or(Error::MissingField {
            field: field.number,
        })?;
    match (field.width, &*value) {
        (FloatWidth::F64, Value::Double(v)) => Ok(v.to_bits()),
        (FloatWidth::F64, Value::Float(v)) | (FloatWidth::F32, Value::Float(v)) => {
            Ok(widen_f32(*v))
        }
        (width, other) => Err(Error::TypeMismatch {
            field: field.number,
            expected: match width {
                FloatWidth::F64 => FieldType::Double,
                FloatWidth::F32 => FieldType::Float,
            },
            found: other.kind(),
        }),
    }
}

fn write_frame(
    buf: &mut BitBuffer,
    tsz: &mut [TszFieldState],
    frame: &Frame,
) -> Result<(), BufferFull> {
    for (state, &bits) in tsz.iter_mut().zip(&frame.numeric) {
        state.encode(bits, buf)?;
    }

    match &frame.general {
        None => buf.write_bit(false)?,
        Some(general) => {
            buf.write_bit(true)?;
            write_bitset(buf, &general.changed)?;
            buf.write_varint(general.bytes.len() as u64)?;
            buf.write_bytes(&general.bytes)?;
        }
    }
    Ok(())
}

/// Writes `max + 1` as a varint, then one bit per field number `0..=max`.
fn write_bitset(buf: &mut BitBuffer, numbers: &[u32]) -> Result<(), BufferFull> {
    let max = numbers.iter().copied().max().unwrap_or(0) as usize;
    let mut bits = vec![false; max + 1];
    for &n in numbers {
        bits[n as usize] = true;
    }
    buf.write_varint(bits.len() as u64)?;
    for bit in bits {
        buf.write_bit(bit)?;
    }
    Ok(())
}

/// A compressed stream: frame bits plus the number of messages they hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedStream {
    /// The compressed byte data.
    pub bytes: Vec<u8>,
    /// Total number of valid bits in `bytes`.
    pub total_bits: usize,
    /// Number of messages in this stream.
    pub count: u64,
}
