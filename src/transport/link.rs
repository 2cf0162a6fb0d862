//! Physical link abstraction.
//!
//! The pool never speaks a radio or serial protocol itself. A [`Transport`]
//! builds fresh [`Link`] instances and each link knows how to find a channel
//! on a device, connect to it, write bytes and close.
//!
//! # Link Lifecycle
//!
//! ```text
//! Transport::new_link ──► find_channel ──► connect ──► LinkEvents
//!                              │              │          ├─ Data(bytes)
//!                              ▼              ▼          ├─ Failure(err)
//!                          LinkError      LinkError      └─ Closed(err?)
//! ```
//!
//! A link is used for one connection attempt only. After any failure the
//! supervisor discards it and asks the transport for a new one.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::result::Result as StdResult;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::identifiers::Address;

// ============================================================================
// LinkError
// ============================================================================

/// Failure reported by a transport.
///
/// Carries only the transport's message text. The supervisor compares these
/// texts to suppress repeated identical log lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LinkError {
    message: String,
}

impl LinkError {
    /// Creates a link error from a message.
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the transport's message.
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Channel discovered on a device (e.g. an RFCOMM channel number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel(pub u8);

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// LinkEvent
// ============================================================================

/// Event emitted by a connected link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Inbound bytes, one chunk as received.
    Data(Bytes),
    /// Asynchronous failure while connected.
    Failure(LinkError),
    /// The link closed, optionally with a reason.
    Closed(Option<LinkError>),
}

/// Stream of events for one connected link.
///
/// Transports keep the matching sender and push events in the order they
/// happen on the wire. Dropping the sender counts as a close.
pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

/// Creates a sender/receiver pair for [`LinkEvents`].
#[inline]
#[must_use]
pub fn link_events() -> (mpsc::UnboundedSender<LinkEvent>, LinkEvents) {
    mpsc::unbounded_channel()
}

// ============================================================================
// Link
// ============================================================================

/// One physical connection attempt to a device.
///
/// Every method takes `&mut self`: a link is exclusively owned by its
/// supervisor and never shared.
#[async_trait]
pub trait Link: Send + 'static {
    /// Looks up the serial channel offered by the device at `address`.
    async fn find_channel(&mut self, address: &Address) -> StdResult<Channel, LinkError>;

    /// Opens `channel` on `address`.
    ///
    /// On success returns the event stream for the new connection.
    async fn connect(
        &mut self,
        address: &Address,
        channel: Channel,
    ) -> StdResult<LinkEvents, LinkError>;

    /// Writes `payload`, returning the number of bytes written.
    async fn write(&mut self, payload: Bytes) -> StdResult<usize, LinkError>;

    /// Returns `true` while the underlying connection is open.
    fn is_open(&self) -> bool;

    /// Closes the connection.
    async fn close(&mut self) -> StdResult<(), LinkError>;
}

// ============================================================================
// Transport
// ============================================================================

/// Factory for fresh [`Link`] instances.
///
/// Called once per connect attempt; implementations must not hand out a
/// link that was used before.
pub trait Transport: Send + Sync + 'static {
    /// Builds an unconnected link for `address`.
    fn new_link(&self, address: &Address) -> Box<dyn Link>;
}

impl<F> Transport for F
where
    F: Fn(&Address) -> Box<dyn Link> + Send + Sync + 'static,
{
    fn new_link(&self, address: &Address) -> Box<dyn Link> {
        self(address)
    }
}

// ============================================================================
// Tests
// ============================================================================
