//! Flow message carrying an opaque payload.

use bytes::Bytes;

/// A message passed between flow nodes.
///
/// Payload bytes are never framed or parsed here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Raw payload; `None` for messages that carry none.
    pub payload: Option<Bytes>,
}

impl Message {
    /// Creates a message with `payload`.
    #[inline]
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: Some(payload.into()),
        }
    }

    /// Creates a message without a payload.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}
