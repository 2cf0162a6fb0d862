//! Outbound adapter: flow message payloads written to the link.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::config::PortConfig;
use crate::error::Result;
use crate::transport::{PortHandle, SerialPool};

use super::message::Message;

// ============================================================================
// SerialOut
// ============================================================================

/// Writes message payloads to the port for one address.
pub struct SerialOut {
    pool: Arc<SerialPool>,
    port: PortHandle,
}

impl SerialOut {
    /// Attaches to the port for `config.address()`.
    ///
    /// # Panics
    ///
    /// Panics outside a Tokio runtime if the port has to be created.
    pub fn new(pool: Arc<SerialPool>, config: &PortConfig) -> Self {
        let port = pool.get(config);
        debug!(address = %port.address(), "SerialOut attached");
        Self { pool, port }
    }

    /// Handles one input message.
    ///
    /// Messages without a payload, and messages arriving while the link is
    /// down, are dropped and yield `Ok(None)`. Otherwise returns the number
    /// of bytes written.
    ///
    /// # Errors
    ///
    /// Returns the write error after logging it; callers typically attach
    /// it to the message for an operator to see.
    pub async fn input(&self, msg: &Message) -> Result<Option<usize>> {
        let Some(payload) = msg.payload.clone() else {
            trace!(address = %self.port.address(), "Message without payload ignored");
            return Ok(None);
        };

        if !self.port.is_open() {
            trace!(address = %self.port.address(), "Link not open, message dropped");
            return Ok(None);
        }

        match self.port.write(payload).await {
            Ok(written) => Ok(Some(written)),
            Err(e) => {
                error!(address = %self.port.address(), error = %e, "BTSerial - Write failed");
                Err(e)
            }
        }
    }

    /// Returns the shared port handle.
    #[inline]
    #[must_use]
    pub fn port(&self) -> &PortHandle {
        &self.port
    }

    /// Closes the shared port for this address.
    pub async fn close(self) {
        self.pool.close(self.port.address()).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
