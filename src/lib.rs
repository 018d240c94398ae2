//! # msgtsz
//!
//! Streaming delta compression for schema-typed messages, for the storage
//! tier of a time-series database.
//!
//! ## Algorithm overview
//!
//! Consecutive messages of one series are usually almost identical. Each
//! message becomes one frame of a single append-only bit stream:
//!
//! - **Float fields** (`double` and `float`) are XOR compressed against the
//!   previous value of the same field, Gorilla style. An unchanged value costs
//!   one bit; a value that changes in the same bit range as last time costs
//!   two bits plus the changed bits.
//!
//! - **Every other field** is compared with the previous message. If nothing
//!   changed the frame spends one bit on them. Otherwise it carries a bitmap
//!   of changed field numbers and only the changed fields, serialized in
//!   protobuf wire form.
//!
//! The first frame of a stream carries every value in full. A frame has no
//! length of its own: decoding needs the schema and the previous message.
//!
//! ## Example
//!
//! ```rust
//! use msgtsz::{Decoder, Encoder, FieldDescriptor, FieldType, Message, Schema};
//! use std::sync::Arc;
//!
//! let schema = Arc::new(Schema::new("cpu", vec![
//!     FieldDescriptor::new(1, "usage", FieldType::Double),
//!     FieldDescriptor::new(2, "host", FieldType::String),
//! ])?);
//!
//! // Compress
//! let mut encoder = Encoder::new(schema.clone())?;
//! encoder.encode(&Message::new().with(1, 0.25).with(2, "web-1"))?;
//! encoder.encode(&Message::new().with(1, 0.25).with(2, "web-1"))?;
//! encoder.encode(&Message::new().with(1, 0.50).with(2, "web-1"))?;
//! let compressed = encoder.into_compressed();
//! println!("Compressed {} messages into {} bytes", compressed.count, compressed.bytes.len());
//!
//! // Decompress
//! let messages = Decoder::new(schema, &compressed)?.decode_all()?;
//! assert_eq!(messages.len(), 3);
//! assert_eq!(messages[2], Message::new().with(1, 0.50).with(2, "web-1"));
//! # Ok::<(), msgtsz::Error>(())
//! ```
//!
//! ## Lazy iteration
//!
//! `Decoder` is an iterator, so long streams need not be decoded at once:
//!
//! ```rust
//! # use msgtsz::{Decoder, Encoder, FieldDescriptor, FieldType, Message, Schema};
//! # use std::sync::Arc;
//! # let schema = Arc::new(Schema::new("cpu", vec![
//! #     FieldDescriptor::new(1, "usage", FieldType::Double),
//! # ]).unwrap());
//! # let mut encoder = Encoder::new(schema.clone()).unwrap();
//! # encoder.encode(&Message::new().with(1, 0.25)).unwrap();
//! # let compressed = encoder.into_compressed();
//! for result in Decoder::new(schema, &compressed).unwrap() {
//!     let message = result.unwrap();
//!     println!("{:?}", message.get(1));
//! }
//! ```

pub mod bitbuffer;
pub mod config;
pub mod decoder;
pub mod encoder;
mod error;
pub mod schema;
mod state;
pub mod tsz;
pub mod value;
pub mod varint;
pub mod wire;

// Re-export primary types at the crate root.
pub use bitbuffer::{BitBuffer, BitReader, BufferFull, ReadError};
pub use config::EncoderConfig;
pub use decoder::Decoder;
pub use encoder::{CompressedStream, Encoder};
pub use error::{Error, Result};
pub use schema::{classify, FieldDescriptor, FieldPartition, FieldType, FloatWidth, Schema};
pub use value::{Message, StructuredValue, Value};
