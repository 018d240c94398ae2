use std::sync::Arc;

use tracing::{debug, trace};

use crate::bitbuffer::{BitReader, ReadError};
use crate::encoder::CompressedStream;
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::state::StreamState;
use crate::tsz::value_from_bits;
use crate::value::{convert, Message, StructuredValue};
use crate::wire;

/// The stream decoder.
///
/// Reconstructs messages frame by frame. Each frame is read against the
/// previous decoded message, so frames must be decoded in order and a failure
/// is fatal to the rest of the stream.
///
/// # Example
/// ```
/// use msgtsz::{Decoder, Encoder, FieldDescriptor, FieldType, Message, Schema};
/// use std::sync::Arc;
///
/// let schema = Arc::new(Schema::new("reading", vec![
///     FieldDescriptor::new(1, "value", FieldType::Double),
///     FieldDescriptor::new(2, "tag", FieldType::String),
/// ]).unwrap());
///
/// let mut encoder = Encoder::new(schema.clone()).unwrap();
/// encoder.encode(&Message::new().with(1, 12.0).with(2, "a")).unwrap();
/// encoder.encode(&Message::new().with(1, 12.5).with(2, "a")).unwrap();
/// let compressed = encoder.into_compressed();
///
/// let messages = Decoder::new(schema, &compressed).unwrap().decode_all().unwrap();
/// assert_eq!(messages.len(), 2);
/// assert_eq!(messages[1], Message::new().with(1, 12.5).with(2, "a"));
/// ```
#[derive(Debug)]
pub struct Decoder<'a> {
    reader: BitReader<'a>,
    state: StreamState,
    /// Number of messages decoded so far.
    count: u64,
    poisoned: bool,
}

impl<'a> Decoder<'a> {
    /// Opens a `CompressedStream` for decoding.
    pub fn new(schema: impl Into<Arc<Schema>>, stream: &'a CompressedStream) -> Result<Self> {
        Self::from_raw(schema, &stream.bytes, stream.total_bits)
    }

    /// Opens raw bytes + total bit count for decoding.
    pub fn from_raw(
        schema: impl Into<Arc<Schema>>,
        bytes: &'a [u8],
        total_bits: usize,
    ) -> Result<Self> {
        Self::from_reader(schema, BitReader::from_raw(bytes, total_bits))
    }

    /// Decodes from an already positioned reader.
    pub fn from_reader(schema: impl Into<Arc<Schema>>, reader: BitReader<'a>) -> Result<Self> {
        let state = StreamState::new(schema.into())?;
        debug!(
            schema = state.schema.name(),
            numeric_fields = state.partition.numeric.len(),
            general_fields = state.partition.general.len(),
            available_bits = reader.remaining(),
            "Opened decoder stream"
        );
        Ok(Self {
            reader,
            state,
            count: 0,
            poisoned: false,
        })
    }

    /// Decodes the next message.
    ///
    /// Returns `UnexpectedEof` once the stream is exhausted. After any error
    /// the decoder is poisoned and every later call returns `Poisoned`.
    pub fn decode(&mut self) -> Result<Message> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        let start = self.reader.position();
        match self.decode_frame() {
            Ok(message) => {
                trace!(
                    frame = self.count,
                    bits = self.reader.position() - start,
                    fields = message.len(),
                    "Decoded frame"
                );
                self.count += 1;
                Ok(message)
            }
            Err(err) => {
                debug!(frame = self.count, start_bit = start, error = %err, "Decoder poisoned");
                self.poisoned = true;
                Err(err)
            }
        }
    }

    /// Decodes the next message into a typed value.
    pub fn decode_into<M: StructuredValue + Default>(&mut self) -> Result<M> {
        let message = self.decode()?;
        convert(&message)
    }

    /// Decodes every remaining message.
    pub fn decode_all(mut self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        while !self.is_exhausted() {
            messages.push(self.decode()?);
        }
        Ok(messages)
    }

    /// Returns `true` once every bit has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.reader.is_exhausted()
    }

    /// Returns the number of messages decoded so far.
    pub fn decoded_count(&self) -> u64 {
        self.count
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.state.schema
    }

    fn decode_frame(&mut self) -> Result<Message> {
        let mut out = Message::new();

        // ── Numeric fields ──────────────────────────────────────────
        for field in self.state.tsz.iter_mut() {
            let bits = field
                .decode(&mut self.reader)
                .map_err(|e| locate(e, self.reader.position()))?;
            out.insert(field.field(), value_from_bits(field.width(), bits));
        }

        // ── General fields ──────────────────────────────────────────
        let changed = self.read(|r| r.read_bit())?;
        let general = if !changed {
            match &self.state.last {
                Some(last) => last.clone(),
                None => {
                    return Err(Error::corrupt(
                        self.reader.position(),
                        "first frame has no general payload",
                    ))
                }
            }
        } else {
            self.read_general()?
        };

        for (number, value) in general.iter() {
            out.insert(number, value.clone());
        }
        self.state.last = Some(general);
        Ok(out)
    }

    fn read_general(&mut self) -> Result<Message> {
        let schema = Arc::clone(&self.state.schema);

        let bitmap_len = self.read(|r| r.read_varint())?;
        if bitmap_len > schema.max_field_number() as u64 + 1 {
            return Err(Error::corrupt(
                self.reader.position(),
                format!(
                    "bitmap of {} bits exceeds the largest field number {}",
                    bitmap_len,
                    schema.max_field_number()
                ),
            ));
        }
        let mut changed = Vec::new();
        for number in 0..bitmap_len as u32 {
            if self.read(|r| r.read_bit())? {
                if !self.state.partition.is_general(number) {
                    return Err(Error::corrupt(
                        self.reader.position(),
                        format!("bitmap marks field {number}, which is not a general field"),
                    ));
                }
                changed.push(number);
            }
        }

        let payload_len = self.read(|r| r.read_varint())?;
        if payload_len > (self.reader.remaining() / 8) as u64 {
            return Err(Error::UnexpectedEof);
        }
        let payload = self.read(|r| r.read_bytes(payload_len as usize))?;
        let partial = wire::unmarshal(&payload, &schema)?;
        if let Some((number, _)) = partial.iter().find(|(n, _)| !changed.contains(n)) {
            return Err(Error::corrupt(
                self.reader.position(),
                format!("payload carries field {number}, which the bitmap marks unchanged"),
            ));
        }

        let last = self.state.last.as_ref();
        Ok(self
            .state
            .partition
            .general
            .iter()
            .filter_map(|&number| {
                let value = if changed.contains(&number) {
                    partial.get(number)
                } else {
                    last.and_then(|m| m.get(number))
                };
                value.map(|v| (number, v.clone()))
            })
            .collect())
    }

    fn read<T>(&mut self, f: impl FnOnce(&mut BitReader<'a>) -> Result<T, ReadError>) -> Result<T> {
        f(&mut self.reader).map_err(|e| locate(e.into(), self.reader.position()))
    }
}

/// Attaches the reader position to corrupt-frame errors raised below the
/// decoder.
fn locate(err: Error, position: usize) -> Error {
    match err {
        Error::CorruptFrame { reason, .. } => Error::CorruptFrame { position, reason },
        other => other,
    }
}

/// Lazily yields messages until the stream is exhausted or a frame fails.
impl Iterator for Decoder<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned || self.is_exhausted() {
            return None;
        }
        Some(self.decode())
    }
}
