use std::sync::Arc;

use crate::error::Result;
use crate::schema::{classify, FieldPartition, Schema};
use crate::tsz::TszFieldState;
use crate::value::Message;

/// Everything a stream carries from one frame to the next.
///
/// Owned by exactly one encoder or decoder.
#[derive(Debug, Clone)]
pub(crate) struct StreamState {
    pub schema: Arc<Schema>,
    pub partition: FieldPartition,
    /// One entry per numeric field, in schema order.
    pub tsz: Vec<TszFieldState>,
    /// General fields of the previous message. `None` before the first frame.
    pub last: Option<Message>,
}

impl StreamState {
    pub fn new(schema: Arc<Schema>) -> Result<Self> {
        let partition = classify(&schema)?;
        let tsz = partition.numeric.iter().copied().map(TszFieldState::new).collect();
        Ok(Self {
            schema,
            partition,
            tsz,
            last: None,
        })
    }

    pub fn is_first(&self) -> bool {
        self.last.is_none()
    }
}
