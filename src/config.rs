use serde::{Deserialize, Serialize};

use crate::bitbuffer::BitBuffer;

/// Encoder buffer settings.
///
/// Every field has a default, so a partial config file is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Bytes pre-allocated for the output buffer.
    pub initial_capacity: usize,
    /// Hard cap on the output size. A frame that would cross it fails with
    /// `Error::BufferFull` and is rolled back.
    pub max_bytes: Option<usize>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 128,
            max_bytes: None,
        }
    }
}

impl EncoderConfig {
    pub(crate) fn buffer(&self) -> BitBuffer {
        let mut buf = BitBuffer::with_capacity(self.initial_capacity);
        buf.set_limit(self.max_bytes);
        buf
    }
}
