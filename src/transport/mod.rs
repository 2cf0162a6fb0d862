//! Link supervision layer.
//!
//! This module owns everything between a subscriber and the physical link:
//! the pool registry, the per-address supervisor and the handle subscribers
//! hold.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  get / close  ┌──────────────┐  new_link  ┌──────────────┐
//! │  Subscriber  │──────────────►│  SerialPool  │───────────►│  Transport   │
//! │ (PortHandle) │               └──────┬───────┘            └──────┬───────┘
//! │              │  write               │ spawns                    │ builds
//! │              │──────────────►┌──────▼───────┐  owns      ┌──────▼───────┐
//! │              │◄──────────────│  Supervisor  │───────────►│     Link     │
//! └──────────────┘ ready/data/   └──────────────┘◄───────────└──────────────┘
//!                  closed                          LinkEvents
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handle` | Subscriber handle and listener registry |
//! | `link` | Transport-facing traits and events |
//! | `pool` | Address-keyed registry |
//! | `supervisor` | Connect/retry state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Subscriber handle.
pub mod handle;

/// Transport-facing link abstraction.
pub mod link;

/// Address-keyed supervisor registry.
pub mod pool;

/// Per-address connect/retry state machine.
pub(crate) mod supervisor;

// ============================================================================
// Re-exports
// ============================================================================

pub use handle::PortHandle;
pub use link::{Channel, Link, LinkError, LinkEvent, LinkEvents, Transport, link_events};
pub use pool::SerialPool;
