//! Connection pool keyed by device address.
//!
//! Every subscriber of an address shares one supervisor, and therefore one
//! physical link. The pool creates supervisors lazily and evicts them only
//! on an explicit [`SerialPool::close`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              SerialPool                 │
//! │  ┌─────────────────────────────────┐    │
//! │  │ "00:11:.." → Supervisor ─► Link │    │
//! │  │ "AA:BB:.." → Supervisor ─► Link │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//!        ▲ get / close           ▲ get
//!   SerialIn node           SerialOut node
//! ```
//!
//! The pool is an ordinary value: build one per process (or per test) and
//! share it behind an `Arc`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::config::PortConfig;
use crate::identifiers::Address;

use super::handle::PortHandle;
use super::link::Transport;
use super::supervisor::Supervisor;

// ============================================================================
// SerialPool
// ============================================================================

/// Registry of supervised serial links.
///
/// Thread-safe. Registration is synchronous, so two `get` calls for the same
/// address always return the same handle even if the first connect attempt
/// has not finished.
///
/// # Example
///
/// ```ignore
/// let pool = Arc::new(SerialPool::new(MyTransport::default()));
///
/// let port = pool.get(&PortConfig::new("00:11:22:33:44:55"));
/// port.on_data(|chunk| println!("{chunk:?}"));
///
/// pool.close(port.address()).await;
/// ```
pub struct SerialPool {
    /// Builds a fresh link for each connect attempt.
    transport: Arc<dyn Transport>,

    /// Live supervisors by address.
    ports: RwLock<FxHashMap<Address, PortHandle>>,
}

impl fmt::Debug for SerialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPool")
            .field("ports", &self.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SerialPool - Constructor
// ============================================================================

impl SerialPool {
    /// Creates an empty pool over `transport`.
    #[must_use]
    pub fn new(transport: impl Transport) -> Self {
        Self::with_transport(Arc::new(transport))
    }

    /// Creates an empty pool over a shared transport.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            ports: RwLock::new(FxHashMap::default()),
        }
    }
}

// ============================================================================
// SerialPool - Public API
// ============================================================================

impl SerialPool {
    /// Returns the handle for `config.address()`, creating the supervisor if needed.
    ///
    /// An existing supervisor is returned as is; `config` only matters for
    /// the first caller.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime when a supervisor has to be
    /// created.
    pub fn get(&self, config: &PortConfig) -> PortHandle {
        self.get_with(config, |_| {})
    }

    /// Like [`SerialPool::get`], but runs `register` before a new supervisor
    /// starts its first connect attempt.
    ///
    /// Use it to attach listeners that must not miss the first `ready`. If
    /// `register` panics while creating a supervisor, the new entry is
    /// removed again before the panic propagates.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime when a supervisor has to be
    /// created.
    pub fn get_with(&self, config: &PortConfig, register: impl FnOnce(&PortHandle)) -> PortHandle {
        let address = config.address();

        let (handle, supervisor) = {
            let mut ports = self.ports.write();
            match ports.get(address) {
                Some(handle) => (handle.clone(), None),
                None => {
                    let (handle, supervisor) = Supervisor::new(config, Arc::clone(&self.transport));
                    ports.insert(address.clone(), handle.clone());
                    (handle, Some(supervisor))
                }
            }
        };

        let Some(supervisor) = supervisor else {
            register(&handle);
            return handle;
        };

        let guard = EvictOnUnwind {
            ports: &self.ports,
            handle: &handle,
        };
        register(&handle);
        std::mem::forget(guard);

        debug!(
            address = %address,
            reconnect_interval = ?config.reconnect_interval(),
            "Supervisor created"
        );
        tokio::spawn(supervisor.run());

        handle
    }

    /// Closes the supervisor for `address` and evicts it.
    ///
    /// Resolves once the link is closed. Unknown addresses resolve
    /// immediately. Link close errors are swallowed; the entry is always
    /// removed and the future always completes.
    pub async fn close(&self, address: &Address) {
        let removed = self.ports.write().remove(address);

        match removed {
            Some(handle) => {
                handle.shutdown().await;
                debug!(address = %address, "Supervisor removed from pool");
            }
            None => debug!(address = %address, "Close for unknown address"),
        }
    }

    /// Closes every supervisor in the pool.
    pub async fn shutdown(&self) {
        let handles: Vec<PortHandle> = {
            let mut ports = self.ports.write();
            ports.drain().map(|(_, handle)| handle).collect()
        };

        info!(count = handles.len(), "SerialPool shutting down");
        join_all(handles.iter().map(PortHandle::shutdown)).await;
        info!("SerialPool shutdown complete");
    }
}

// ============================================================================
// SerialPool - Introspection
// ============================================================================

impl SerialPool {
    /// Returns the number of registered supervisors.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ports.read().len()
    }

    /// Returns `true` if no supervisor is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ports.read().is_empty()
    }

    /// Returns `true` if a supervisor is registered for `address`.
    #[inline]
    #[must_use]
    pub fn contains(&self, address: &Address) -> bool {
        self.ports.read().contains_key(address)
    }
}

// ============================================================================
// EvictOnUnwind
// ============================================================================

/// Removes a freshly inserted entry if the registration closure panics.
///
/// Its supervisor was never spawned, so the entry would otherwise hand out a
/// dead handle.
struct EvictOnUnwind<'a> {
    ports: &'a RwLock<FxHashMap<Address, PortHandle>>,
    handle: &'a PortHandle,
}

impl Drop for EvictOnUnwind<'_> {
    fn drop(&mut self) {
        let mut ports = self.ports.write();
        if ports
            .get(self.handle.address())
            .is_some_and(|current| current.same_port(self.handle))
        {
            ports.remove(self.handle.address());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::testing::{Recorder, ScriptedTransport, Seen, settle};

    fn pool(transport: &ScriptedTransport) -> SerialPool {
        SerialPool::with_transport(transport.as_transport())
    }

    fn config(address: &str) -> PortConfig {
        PortConfig::new(address).with_reconnect_secs(1.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_same_supervisor() {
        let transport = ScriptedTransport::new();
        let pool = pool(&transport);

        let first = pool.get(&config("AA:BB"));
        let second = pool.get(&config("AA:BB"));
        let third = pool.get(&config("AA:BB"));
        settle().await;

        assert!(first.same_port(&second));
        assert!(first.same_port(&third));
        assert_eq!(pool.len(), 1);
        assert_eq!(transport.links_created(), 1);
        assert_eq!(transport.discover_calls(), 1);
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_share_one_attempt() {
        let transport = ScriptedTransport::new();
        let pool = Arc::new(pool(&transport));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.get(&config("AA:BB")) })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.expect("join"));
        }
        settle().await;

        assert!(handles.iter().all(|h| h.same_port(&handles[0])));
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_config_wins() {
        let transport = ScriptedTransport::new();
        let pool = pool(&transport);

        let first = pool.get(&PortConfig::new("AA:BB").with_reconnect_secs(1.0));
        let second = pool.get(&PortConfig::new("AA:BB").with_reconnect_secs(60.0));

        assert_eq!(first.reconnect_interval(), Duration::from_secs(1));
        assert_eq!(second.reconnect_interval(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_addresses_are_isolated() {
        let transport = ScriptedTransport::new();
        let pool = pool(&transport);

        let a = pool.get(&config("AA:BB"));
        let b = pool.get(&config("CC:DD"));
        let seen_a = Recorder::attach(&a);
        let seen_b = Recorder::attach(&b);
        settle().await;

        assert!(!a.same_port(&b));
        assert_eq!(pool.len(), 2);
        assert_eq!(transport.links_created(), 2);
        assert!(a.is_open());
        assert!(b.is_open());

        transport.emit_data("CC:DD", &[0x07]);
        settle().await;

        assert_eq!(seen_a.seen(), vec![Seen::Ready]);
        assert_eq!(seen_b.seen(), vec![Seen::Ready, Seen::Data(vec![0x07])]);
        assert!(a.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_subscriber_sees_events() {
        let transport = ScriptedTransport::new();
        let pool = pool(&transport);

        let reader = Recorder::attach(&pool.get(&config("AA:BB")));
        let writer = Recorder::attach(&pool.get(&config("AA:BB")));
        settle().await;

        transport.emit_data("AA:BB", &[0x01, 0x02]);
        settle().await;

        let expected = vec![Seen::Ready, Seen::Data(vec![0x01, 0x02])];
        assert_eq!(reader.seen(), expected);
        assert_eq!(writer.seen(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_with_registers_before_connect() {
        let transport = ScriptedTransport::new();
        let pool = pool(&transport);

        let mut recorder = None;
        pool.get_with(&config("AA:BB"), |port| {
            recorder = Some(Recorder::attach(port));
        });
        settle().await;

        assert_eq!(recorder.expect("registered").seen(), vec![Seen::Ready]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_unknown_address_completes() {
        let transport = ScriptedTransport::new();
        let pool = pool(&transport);

        tokio_test::assert_ready!(tokio_test::task::spawn(pool.close(&Address::new("AA:BB"))).poll());
        assert!(pool.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_connected() {
        let transport = ScriptedTransport::new();
        transport.emit_closed_on_close();
        let pool = pool(&transport);
        let port = pool.get(&config("AA:BB"));
        let recorder = Recorder::attach(&port);
        settle().await;

        pool.close(port.address()).await;

        assert_eq!(transport.close_calls(), 1);
        assert!(!pool.contains(port.address()));
        assert!(!port.is_open());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.seen(), vec![Seen::Ready]);
        assert_eq!(transport.links_created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_close_is_ignored() {
        let transport = ScriptedTransport::new();
        let pool = pool(&transport);
        let port = pool.get(&config("AA:BB"));
        let recorder = Recorder::attach(&port);
        settle().await;

        pool.close(port.address()).await;
        transport.emit_failure("AA:BB", "timeout");
        transport.emit_closed("AA:BB");
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(recorder.seen(), vec![Seen::Ready]);
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_with_failing_link_still_evicts() {
        let transport = ScriptedTransport::new();
        transport.fail_close("device busy");
        let pool = pool(&transport);
        let port = pool.get(&config("AA:BB"));
        settle().await;

        pool.close(port.address()).await;

        assert!(pool.is_empty());
        assert_eq!(transport.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_retry_stops_reconnects() {
        let transport = ScriptedTransport::new();
        transport.fail_discovery(100, "no channel");
        let pool = pool(&transport);
        let port = pool.get(&config("AA:BB"));
        settle().await;

        pool.close(port.address()).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.discover_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_close_builds_fresh_supervisor() {
        let transport = ScriptedTransport::new();
        let pool = pool(&transport);
        let old = pool.get(&config("AA:BB"));
        settle().await;

        pool.close(old.address()).await;
        let fresh = pool.get(&PortConfig::new("AA:BB").with_reconnect_secs(5.0));
        settle().await;

        assert!(!old.same_port(&fresh));
        assert_eq!(fresh.reconnect_interval(), Duration::from_secs(5));
        assert!(fresh.is_open());
        assert_eq!(transport.links_created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_after_close_reports_supervisor_gone() {
        let transport = ScriptedTransport::new();
        let pool = pool(&transport);
        let port = pool.get(&config("AA:BB"));
        settle().await;

        pool.close(port.address()).await;

        let err = port.write(&b"late"[..]).await.unwrap_err();
        assert!(matches!(err, crate::Error::SupervisorGone { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_everything() {
        let transport = ScriptedTransport::new();
        let pool = pool(&transport);
        pool.get(&config("AA:BB"));
        pool.get(&config("CC:DD"));
        settle().await;

        pool.shutdown().await;

        assert!(pool.is_empty());
        assert_eq!(transport.close_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_discovery_completes() {
        let transport = ScriptedTransport::new();
        transport.stall_discovery();
        let pool = pool(&transport);
        let port = pool.get(&config("AA:BB"));
        let recorder = Recorder::attach(&port);
        settle().await;
        assert_eq!(transport.discover_calls(), 1);

        let closed = tokio::time::timeout(Duration::from_secs(60), pool.close(port.address())).await;
        assert!(closed.is_ok());
        assert!(pool.is_empty());
        assert_eq!(transport.close_calls(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(recorder.seen().is_empty());
        assert_eq!(transport.links_created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_with_hung_write_completes() {
        let transport = ScriptedTransport::new();
        transport.stall_writes();
        let pool = pool(&transport);
        let port = pool.get(&config("AA:BB"));
        let recorder = Recorder::attach(&port);
        settle().await;

        let writer = port.clone();
        let write = tokio::spawn(async move { writer.write(&b"x"[..]).await });
        settle().await;

        transport.emit_data("AA:BB", &[0x01]);
        settle().await;
        assert_eq!(recorder.seen(), vec![Seen::Ready, Seen::Data(vec![0x01])]);

        let closed = tokio::time::timeout(Duration::from_secs(60), pool.close(port.address())).await;
        assert!(closed.is_ok());
        assert_eq!(transport.close_calls(), 1);

        let err = write.await.expect("join").unwrap_err();
        assert!(matches!(err, crate::Error::SupervisorGone { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_register_leaves_no_entry() {
        let transport = ScriptedTransport::new();
        let pool = pool(&transport);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pool.get_with(&config("AA:BB"), |_| panic!("listener setup failed"));
        }));
        assert!(result.is_err());
        assert!(pool.is_empty());

        let port = pool.get(&config("AA:BB"));
        settle().await;
        assert!(port.is_open());
        assert_eq!(transport.links_created(), 1);
    }
}
