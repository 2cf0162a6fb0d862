//! bt-serial-pool - Shared, self-reconnecting serial links.
//!
//! This library lets any number of readers and writers share one serial
//! (e.g. Bluetooth RFCOMM) link per device address. The link is opened
//! lazily, kept alive across transient failures by a fixed-interval
//! reconnect loop, and closed only on request.
//!
//! # Architecture
//!
//! - **Transport**: supplied by the caller; builds [`Link`]s that discover a
//!   channel, connect, write and close
//! - **Supervisor**: one task per address running the connect/retry state
//!   machine and fanning events out to subscribers
//! - **Pool**: [`SerialPool`] maps addresses to supervisors, one each
//! - **Subscribers**: hold a [`PortHandle`] and listen for `ready`, `data`
//!   and `closed`
//!
//! Connection failures never surface as errors to subscribers. They are
//! logged (identical consecutive connect failures once) and retried after
//! the configured interval. Only writes report errors to their caller.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use bt_serial_pool::{PortConfig, Result, SerialPool};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pool = Arc::new(SerialPool::new(MyRfcommTransport::default()));
//!
//!     let config = PortConfig::from_json(r#"{"btAddress":"00:11:22:33:44:55","serialReconnectTime":5}"#)?;
//!     let port = pool.get_with(&config, |port| {
//!         port.on_ready(|| println!("connected"));
//!         port.on_data(|chunk| println!("received {} bytes", chunk.len()));
//!         port.on_closed(|| println!("link lost, retrying"));
//!     });
//!
//!     if port.is_open() {
//!         port.write(&b"hello"[..]).await?;
//!     }
//!
//!     pool.close(port.address()).await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | [`PortConfig`] and config-node loading |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`flow`] | [`SerialIn`] / [`SerialOut`] message adapters |
//! | [`identifiers`] | [`Address`] newtype |
//! | [`transport`] | Pool, supervisor, handle and link traits |

// ============================================================================
// Modules
// ============================================================================

/// Port configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Flow message adapters.
pub mod flow;

/// Type-safe identifiers.
pub mod identifiers;

/// Pool, supervision and link abstraction.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{DEFAULT_RECONNECT_INTERVAL, PortConfig};

// Error types
pub use error::{Error, Result};

// Flow types
pub use flow::{Message, SerialIn, SerialOut};

// Identifier types
pub use identifiers::Address;

// Transport types
pub use transport::{
    Channel, Link, LinkError, LinkEvent, LinkEvents, PortHandle, SerialPool, Transport,
    link_events,
};
