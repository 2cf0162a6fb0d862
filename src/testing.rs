//! Test doubles: a scripted transport, an event recorder and log capture.

use std::collections::VecDeque;
use std::io;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::subscriber::DefaultGuard;

use crate::identifiers::Address;
use crate::transport::{
    Channel, Link, LinkError, LinkEvent, LinkEvents, PortHandle, Transport, link_events,
};

/// Lets spawned supervisors run until they block again.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============================================================================
// ScriptedTransport
// ============================================================================

#[derive(Default)]
struct Script {
    discovery: VecDeque<LinkError>,
    connects: VecDeque<LinkError>,
    write_error: Option<LinkError>,
    close_error: Option<LinkError>,
    closed_on_close: bool,
    stall_discovery: bool,
    stall_connect: bool,
    stall_writes: bool,

    links_created: usize,
    discover_calls: usize,
    connect_calls: usize,
    close_calls: usize,
    written: Vec<Bytes>,
    /// Event sender of the latest connected link, per address.
    senders: FxHashMap<Address, mpsc::UnboundedSender<LinkEvent>>,
}

/// Transport whose links succeed unless told otherwise.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn as_transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    /// Next `times` discoveries fail with `message`.
    pub(crate) fn fail_discovery(&self, times: usize, message: &str) {
        let mut script = self.script.lock();
        script
            .discovery
            .extend(std::iter::repeat_n(LinkError::new(message), times));
    }

    /// Next `times` connects fail with `message`.
    pub(crate) fn fail_connect(&self, times: usize, message: &str) {
        let mut script = self.script.lock();
        script
            .connects
            .extend(std::iter::repeat_n(LinkError::new(message), times));
    }

    pub(crate) fn fail_writes(&self, message: &str) {
        self.script.lock().write_error = Some(LinkError::new(message));
    }

    pub(crate) fn fail_close(&self, message: &str) {
        self.script.lock().close_error = Some(LinkError::new(message));
    }

    /// Links push `Closed` on their own stream when closed.
    pub(crate) fn emit_closed_on_close(&self) {
        self.script.lock().closed_on_close = true;
    }

    /// Discoveries from now on never resolve.
    pub(crate) fn stall_discovery(&self) {
        self.script.lock().stall_discovery = true;
    }

    /// Connects from now on never resolve.
    pub(crate) fn stall_connect(&self) {
        self.script.lock().stall_connect = true;
    }

    /// Writes from now on never resolve.
    pub(crate) fn stall_writes(&self) {
        self.script.lock().stall_writes = true;
    }

    pub(crate) fn emit_data(&self, address: &str, bytes: &[u8]) {
        self.emit(address, LinkEvent::Data(Bytes::copy_from_slice(bytes)));
    }

    pub(crate) fn emit_failure(&self, address: &str, message: &str) {
        self.emit(address, LinkEvent::Failure(LinkError::new(message)));
    }

    pub(crate) fn emit_closed(&self, address: &str) {
        self.emit(address, LinkEvent::Closed(None));
    }

    /// Drops the event sender of the link connected to `address`.
    pub(crate) fn drop_events(&self, address: &str) {
        self.script.lock().senders.remove(&Address::from(address));
    }

    fn emit(&self, address: &str, event: LinkEvent) {
        if let Some(tx) = self.script.lock().senders.get(&Address::from(address)) {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn links_created(&self) -> usize {
        self.script.lock().links_created
    }

    pub(crate) fn discover_calls(&self) -> usize {
        self.script.lock().discover_calls
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.script.lock().connect_calls
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.script.lock().close_calls
    }

    pub(crate) fn written(&self) -> Vec<Bytes> {
        self.script.lock().written.clone()
    }
}

impl Transport for ScriptedTransport {
    fn new_link(&self, address: &Address) -> Box<dyn Link> {
        self.script.lock().links_created += 1;
        Box::new(ScriptedLink {
            script: Arc::clone(&self.script),
            address: address.clone(),
            open: false,
        })
    }
}

/// Link whose event sender lives in the shared script, so tests can drive it.
struct ScriptedLink {
    script: Arc<Mutex<Script>>,
    address: Address,
    open: bool,
}

#[async_trait]
impl Link for ScriptedLink {
    async fn find_channel(&mut self, _address: &Address) -> StdResult<Channel, LinkError> {
        let result = {
            let mut script = self.script.lock();
            script.discover_calls += 1;
            if script.stall_discovery {
                None
            } else {
                Some(match script.discovery.pop_front() {
                    Some(err) => Err(err),
                    None => Ok(Channel(1)),
                })
            }
        };

        match result {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn connect(
        &mut self,
        _address: &Address,
        _channel: Channel,
    ) -> StdResult<LinkEvents, LinkError> {
        let result = {
            let mut script = self.script.lock();
            script.connect_calls += 1;
            if script.stall_connect {
                None
            } else if let Some(err) = script.connects.pop_front() {
                Some(Err(err))
            } else {
                let (tx, rx) = link_events();
                script.senders.insert(self.address.clone(), tx);
                self.open = true;
                Some(Ok(rx))
            }
        };

        match result {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn write(&mut self, payload: Bytes) -> StdResult<usize, LinkError> {
        let result = {
            let mut script = self.script.lock();
            if script.stall_writes {
                None
            } else if let Some(err) = script.write_error.clone() {
                Some(Err(err))
            } else {
                let len = payload.len();
                script.written.push(payload);
                Some(Ok(len))
            }
        };

        match result {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> StdResult<(), LinkError> {
        let mut script = self.script.lock();
        script.close_calls += 1;

        self.open = false;
        if script.closed_on_close
            && let Some(tx) = script.senders.get(&self.address)
        {
            let _ = tx.send(LinkEvent::Closed(None));
        }

        match script.close_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// Event as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Seen {
    Ready,
    Data(Vec<u8>),
    Closed,
}

/// Records every event delivered to one subscriber.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    pub(crate) fn attach(port: &PortHandle) -> Self {
        let recorder = Self::default();

        let seen = Arc::clone(&recorder.seen);
        port.on_ready(move || seen.lock().push(Seen::Ready));
        let seen = Arc::clone(&recorder.seen);
        port.on_data(move |chunk| seen.lock().push(Seen::Data(chunk.to_vec())));
        let seen = Arc::clone(&recorder.seen);
        port.on_closed(move || seen.lock().push(Seen::Closed));

        recorder
    }

    pub(crate) fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

// ============================================================================
// LogCapture
// ============================================================================

/// In-memory sink for `tracing` output on the current thread.
#[derive(Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Routes this thread's `tracing` output into the buffer.
    pub(crate) fn install(&self) -> DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Counts lines at ERROR level containing `needle`.
    pub(crate) fn count(&self, needle: &str) -> usize {
        let text = String::from_utf8_lossy(&self.buffer.lock()).into_owned();
        text.lines()
            .filter(|line| line.contains("ERROR") && line.contains(needle))
            .count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
