//! Subscriber-facing port handle.
//!
//! A [`PortHandle`] is what [`SerialPool::get`](crate::SerialPool::get)
//! returns. Every subscriber of an address holds a clone of the same handle;
//! listeners registered through any clone see every event.
//!
//! # Events
//!
//! | Event | Fired when |
//! |-------|------------|
//! | `ready` | a connect attempt succeeded |
//! | `data` | the live link delivered a chunk of bytes |
//! | `closed` | a connected link failed or dropped |
//!
//! Listeners run on the supervisor's task, in event order. They must not
//! block; hand work off to a channel instead.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::Address;

use super::supervisor::Command;

// ============================================================================
// Types
// ============================================================================

/// Listener for `ready` and `closed`.
type SignalListener = Arc<dyn Fn() + Send + Sync>;

/// Listener for `data`.
type DataListener = Arc<dyn Fn(&Bytes) + Send + Sync>;

// ============================================================================
// Listeners
// ============================================================================

/// Append-only listener registry shared by every clone of a handle.
#[derive(Default)]
pub(crate) struct Listeners {
    ready: Mutex<Vec<SignalListener>>,
    data: Mutex<Vec<DataListener>>,
    closed: Mutex<Vec<SignalListener>>,
}

impl Listeners {
    /// Calls every `ready` listener.
    pub(crate) fn emit_ready(&self) {
        // Snapshot so listeners may register more listeners.
        let listeners = self.ready.lock().clone();
        for listener in listeners {
            listener();
        }
    }

    /// Calls every `data` listener with `chunk`.
    pub(crate) fn emit_data(&self, chunk: &Bytes) {
        let listeners = self.data.lock().clone();
        trace!(len = chunk.len(), listeners = listeners.len(), "Fanning out data");
        for listener in listeners {
            listener(chunk);
        }
    }

    /// Calls every `closed` listener.
    pub(crate) fn emit_closed(&self) {
        let listeners = self.closed.lock().clone();
        for listener in listeners {
            listener();
        }
    }

    fn count(&self) -> usize {
        self.ready.lock().len() + self.data.lock().len() + self.closed.lock().len()
    }
}

// ============================================================================
// PortShared
// ============================================================================

/// State shared between handles and the supervisor task.
pub(crate) struct PortShared {
    /// Device address.
    pub(crate) address: Address,
    /// Fixed reconnect delay.
    pub(crate) reconnect_interval: Duration,
    /// Commands into the supervisor.
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    /// Subscriber callbacks.
    pub(crate) listeners: Listeners,
    /// Mirror of the live link's open state.
    open: AtomicBool,
}

impl PortShared {
    pub(crate) fn new(
        address: Address,
        reconnect_interval: Duration,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            address,
            reconnect_interval,
            commands,
            listeners: Listeners::default(),
            open: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}

// ============================================================================
// PortHandle
// ============================================================================

/// Shared handle to the supervised link for one address.
///
/// Cheap to clone. All clones obtained from the same pool entry refer to the
/// same supervisor; see [`PortHandle::same_port`].
///
/// # Example
///
/// ```ignore
/// let port = pool.get(&PortConfig::new("00:11:22:33:44:55"));
/// port.on_ready(|| println!("connected"));
/// port.on_data(|chunk| println!("{} bytes", chunk.len()));
/// port.on_closed(|| println!("lost link"));
///
/// if port.is_open() {
///     port.write(&b"AT\r\n"[..]).await?;
/// }
/// ```
#[derive(Clone)]
pub struct PortHandle {
    pub(crate) inner: Arc<PortShared>,
}

impl fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortHandle")
            .field("address", &self.inner.address)
            .field("reconnect_interval", &self.inner.reconnect_interval)
            .field("open", &self.is_open())
            .field("listeners", &self.inner.listeners.count())
            .finish()
    }
}

// ============================================================================
// PortHandle - Accessors
// ============================================================================

impl PortHandle {
    pub(crate) fn from_shared(inner: Arc<PortShared>) -> Self {
        Self { inner }
    }

    /// Returns the device address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// Returns the reconnect interval the supervisor was built with.
    #[inline]
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        self.inner.reconnect_interval
    }

    /// Returns `true` while the supervisor holds an open link.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Returns `true` if both handles refer to the same supervisor.
    #[inline]
    #[must_use]
    pub fn same_port(&self, other: &PortHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ============================================================================
// PortHandle - Listeners
// ============================================================================

impl PortHandle {
    /// Registers a callback for `ready`.
    pub fn on_ready(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.inner.listeners.ready.lock().push(Arc::new(listener));
    }

    /// Registers a callback for each inbound chunk.
    pub fn on_data(&self, listener: impl Fn(&Bytes) + Send + Sync + 'static) {
        self.inner.listeners.data.lock().push(Arc::new(listener));
    }

    /// Registers a callback for `closed`.
    pub fn on_closed(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.inner.listeners.closed.lock().push(Arc::new(listener));
    }
}

// ============================================================================
// PortHandle - Write
// ============================================================================

impl PortHandle {
    /// Writes `payload` to the live link.
    ///
    /// The handle does not wait for `ready`: check [`PortHandle::is_open`]
    /// first, as [`SerialOut`](crate::SerialOut) does.
    ///
    /// # Errors
    ///
    /// - [`Error::Write`] if the link rejected the write
    /// - [`Error::NotConnected`] if no link is open, or it was lost mid-write
    /// - [`Error::SupervisorGone`] if the port was closed
    pub async fn write(&self, payload: impl Into<Bytes>) -> Result<usize> {
        let (reply, response) = oneshot::channel();

        self.inner
            .commands
            .send(Command::Write {
                payload: payload.into(),
                reply,
            })
            .map_err(|_| Error::supervisor_gone(self.address()))?;

        response
            .await
            .map_err(|_| Error::supervisor_gone(self.address()))?
    }

    /// Asks the supervisor to shut down and waits until it has.
    ///
    /// Returns immediately if the supervisor already stopped.
    pub(crate) async fn shutdown(&self) {
        let (done, finished) = oneshot::channel();
        if self.inner.commands.send(Command::Close { done }).is_ok() {
            let _ = finished.await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
