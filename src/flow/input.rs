//! Inbound adapter: link data as flow messages.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::PortConfig;
use crate::transport::{PortHandle, SerialPool};

use super::message::Message;

// ============================================================================
// SerialIn
// ============================================================================

/// Receives every inbound chunk for one address as a [`Message`].
///
/// The data listener is attached before the port's first connect attempt,
/// so no chunk from the first connection is missed. Chunks queue without
/// bound; the link is never slowed down by a lagging reader.
///
/// # Example
///
/// ```ignore
/// let mut input = SerialIn::new(Arc::clone(&pool), &config);
/// while let Some(msg) = input.recv().await {
///     forward(msg);
/// }
/// ```
pub struct SerialIn {
    pool: Arc<SerialPool>,
    port: PortHandle,
    messages: mpsc::UnboundedReceiver<Message>,
}

impl SerialIn {
    /// Subscribes to the port for `config.address()`.
    ///
    /// # Panics
    ///
    /// Panics outside a Tokio runtime if the port has to be created.
    pub fn new(pool: Arc<SerialPool>, config: &PortConfig) -> Self {
        let (tx, messages) = mpsc::unbounded_channel();

        let port = pool.get_with(config, move |port| {
            port.on_data(move |chunk| {
                let _ = tx.send(Message::new(chunk.clone()));
            });
        });

        debug!(address = %port.address(), "SerialIn attached");

        Self {
            pool,
            port,
            messages,
        }
    }

    /// Waits for the next inbound message.
    ///
    /// Returns `None` once the port is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.messages.recv().await
    }

    /// Returns the shared port handle.
    #[inline]
    #[must_use]
    pub fn port(&self) -> &PortHandle {
        &self.port
    }

    /// Closes the shared port for this address.
    ///
    /// Other nodes on the same address lose their link too.
    pub async fn close(self) {
        self.pool.close(self.port.address()).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
