//! Error types for stream encoding and decoding.
//!
//! Every failure surfaces to the immediate caller of `encode`/`decode`; the
//! codec never retries and never skips a malformed field.
//!
//! ## Scope of each error
//!
//! - **Per message** (encoder): `MissingField`, `TypeMismatch`, `UnknownField`,
//!   `Marshal` and `BufferFull`. The encoder checks everything before it writes
//!   and rolls back a partially written frame, so the stream is still usable
//!   and the caller may retry with a corrected message.
//! - **Per stream** (decoder): `UnexpectedEof`, `CorruptFrame` and `Unmarshal`.
//!   The decoder is poisoned and every later call returns `Poisoned`.
//! - **At construction**: `InvalidSchema` and `UnsupportedSchema`.

use thiserror::Error;

use crate::bitbuffer::{BufferFull, ReadError};
use crate::schema::FieldType;

/// Result type alias for codec operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for the codec.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("numeric field {field} is declared in the schema but missing from the message")]
    MissingField { field: u32 },

    #[error("field {field} is declared as {expected} but holds a {found} value")]
    TypeMismatch {
        field: u32,
        expected: FieldType,
        found: &'static str,
    },

    #[error("field {field} is not declared in the schema")]
    UnknownField { field: u32 },

    #[error("failed to marshal field {field}: {reason}")]
    Marshal { field: u32, reason: String },

    #[error("failed to unmarshal payload: {reason}")]
    Unmarshal { reason: String },

    #[error("unexpected end of compressed stream")]
    UnexpectedEof,

    #[error("field {field} cannot be delta encoded: {reason}")]
    UnsupportedSchema { field: u32, reason: &'static str },

    #[error("invalid schema: {reason}")]
    InvalidSchema { reason: String },

    #[error("corrupt frame at bit {position}: {reason}")]
    CorruptFrame { position: usize, reason: String },

    #[error("write would exceed bit buffer byte limit")]
    BufferFull,

    #[error("stream is unusable after an earlier decode failure")]
    Poisoned,
}

impl Error {
    pub(crate) fn corrupt(position: usize, reason: impl Into<String>) -> Self {
        Error::CorruptFrame {
            position,
            reason: reason.into(),
        }
    }

    pub(crate) fn unmarshal(reason: impl Into<String>) -> Self {
        Error::Unmarshal {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the stream that produced this error can still be used.
    ///
    /// Encoder-side errors leave the stream at the previous frame boundary;
    /// decoder-side errors are fatal to the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MissingField { .. }
                | Error::TypeMismatch { .. }
                | Error::UnknownField { .. }
                | Error::Marshal { .. }
                | Error::BufferFull
        )
    }
}

impl From<BufferFull> for Error {
    fn from(_: BufferFull) -> Self {
        Error::BufferFull
    }
}

impl From<ReadError> for Error {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::UnexpectedEof => Error::UnexpectedEof,
            ReadError::VarintOverflow => Error::CorruptFrame {
                position: 0,
                reason: err.to_string(),
            },
        }
    }
}
