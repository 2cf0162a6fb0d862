//! Flow-engine glue.
//!
//! Thin adapters between flow messages and a pooled port:
//!
//! | Type | Direction |
//! |------|-----------|
//! | [`SerialIn`] | inbound chunks become [`Message`]s |
//! | [`SerialOut`] | [`Message`] payloads are written to the link |
//!
//! Both obtain their port from a shared [`SerialPool`](crate::SerialPool),
//! so an in/out pair configured with the same address shares one link.

// ============================================================================
// Submodules
// ============================================================================

/// Inbound adapter.
pub mod input;

/// Message type.
pub mod message;

/// Outbound adapter.
pub mod output;

// ============================================================================
// Re-exports
// ============================================================================

pub use input::SerialIn;
pub use message::Message;
pub use output::SerialOut;
