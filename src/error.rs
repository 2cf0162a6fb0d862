//! Error types for the serial link pool.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! Fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use bt_serial_pool::{Result, SerialPool, PortConfig};
//!
//! async fn example(pool: &SerialPool) -> Result<()> {
//!     let port = pool.get(&PortConfig::from_json(r#"{"btAddress":"AA:BB"}"#)?);
//!     port.write(&b"ping"[..]).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Discovery`], [`Error::Connect`], [`Error::Runtime`], [`Error::UnexpectedClose`] |
//! | Write path | [`Error::Write`], [`Error::NotConnected`], [`Error::SupervisorGone`] |
//! | External | [`Error::Json`] |
//!
//! Connection errors never reach callers: the supervisor recovers from them
//! by scheduling a reconnect and only reports them through `tracing`.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::Address;
use crate::transport::LinkError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a port configuration is missing or malformed.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// No serial channel was found for the address.
    #[error("Didn't find a Serial Port on '{address}': {source}")]
    Discovery {
        /// Address that was probed.
        address: Address,
        /// Transport-level cause.
        source: LinkError,
    },

    /// A channel was found but opening it was rejected.
    #[error("Can't connect '{address}' - '{source}'")]
    Connect {
        /// Address that was dialed.
        address: Address,
        /// Transport-level cause.
        source: LinkError,
    },

    /// The link reported a failure while connected.
    #[error("Link failure on '{address}': {source}")]
    Runtime {
        /// Address of the failed link.
        address: Address,
        /// Transport-level cause.
        source: LinkError,
    },

    /// The link closed without a close request.
    #[error("Link on '{address}' closed unexpectedly")]
    UnexpectedClose {
        /// Address of the closed link.
        address: Address,
    },

    // ========================================================================
    // Write Errors
    // ========================================================================
    /// The live link rejected a write.
    #[error("Write to '{address}' failed: {source}")]
    Write {
        /// Address written to.
        address: Address,
        /// Transport-level cause.
        source: LinkError,
    },

    /// A write was attempted while no link is open.
    #[error("No open link on '{address}'")]
    NotConnected {
        /// Address written to.
        address: Address,
    },

    /// The supervisor for the address has already shut down.
    #[error("Supervisor for '{address}' has shut down")]
    SupervisorGone {
        /// Address of the supervisor.
        address: Address,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a discovery failure.
    #[inline]
    pub fn discovery(address: &Address, source: LinkError) -> Self {
        Self::Discovery {
            address: address.clone(),
            source,
        }
    }

    /// Creates a connect failure.
    #[inline]
    pub fn connect(address: &Address, source: LinkError) -> Self {
        Self::Connect {
            address: address.clone(),
            source,
        }
    }

    /// Creates a runtime failure.
    #[inline]
    pub fn runtime(address: &Address, source: LinkError) -> Self {
        Self::Runtime {
            address: address.clone(),
            source,
        }
    }

    /// Creates an unexpected close error.
    #[inline]
    pub fn unexpected_close(address: &Address) -> Self {
        Self::UnexpectedClose {
            address: address.clone(),
        }
    }

    /// Creates a write failure.
    #[inline]
    pub fn write(address: &Address, source: LinkError) -> Self {
        Self::Write {
            address: address.clone(),
            source,
        }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(address: &Address) -> Self {
        Self::NotConnected {
            address: address.clone(),
        }
    }

    /// Creates a supervisor gone error.
    #[inline]
    pub fn supervisor_gone(address: &Address) -> Self {
        Self::SupervisorGone {
            address: address.clone(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection-lifecycle error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Discovery { .. }
                | Self::Connect { .. }
                | Self::Runtime { .. }
                | Self::UnexpectedClose { .. }
        )
    }

    /// Returns `true` if this is a write-path error.
    #[inline]
    #[must_use]
    pub fn is_write_error(&self) -> bool {
        matches!(
            self,
            Self::Write { .. }
                | Self::NotConnected { .. }
                | Self::SupervisorGone { .. }
        )
    }

    /// Returns `true` if this error is recovered by the reconnect loop.
    ///
    /// Same set as [`Error::is_connection_error`]; kept separate so callers
    /// read intent rather than category.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_connection_error()
    }
}

// ============================================================================
// Tests
// ============================================================================
