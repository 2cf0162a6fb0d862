//! Per-address connection supervisor.
//!
//! One supervisor task owns the link for one address and runs the
//! connect/retry state machine. Handles talk to it through a command
//! channel; it talks back through the listener registry.
//!
//! # State Machine
//!
//! ```text
//!             ┌──────────────── retry timer fires ◄──────────────┐
//!             ▼                                                  │
//!       ┌────────────┐  no channel / refused                ┌────┴─────────┐
//!  ───► │ Connecting │ ───────────────────────────────────► │RetryScheduled│
//!       └─────┬──────┘                                      └──────────────┘
//!             │ connected (emit ready)                           ▲
//!             ▼                                                  │
//!       ┌────────────┐  failure / unexpected close (emit closed) │
//!       │ Connected  │ ──────────────────────────────────────────┘
//!       └────────────┘
//!
//!   Close command, from any state ──► Closed (terminal)
//! ```
//!
//! The phase enum carries the link or the timer, never both, so a live link
//! and a pending retry cannot coexist and there is never more than one timer.
//!
//! Writes run beside the phase: a write the link never finishes delays later
//! writes, not link events or a close.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::time::{Sleep, sleep};
use tracing::{debug, error, info, trace};

use crate::config::PortConfig;
use crate::error::{Error, Result};
use crate::identifiers::Address;

use super::handle::{PortHandle, PortShared};
use super::link::{Link, LinkError, LinkEvent, LinkEvents, Transport};

// ============================================================================
// Types
// ============================================================================

/// Link shared between the phase, an in-flight write and teardown.
type SharedLink = Arc<AsyncMutex<Box<dyn Link>>>;

/// Result of a finished write plus the link's open state afterwards.
type Written = (Result<usize>, bool);

// ============================================================================
// Command
// ============================================================================

/// Requests from handles to the supervisor task.
pub(crate) enum Command {
    /// Write to the live link.
    Write {
        payload: Bytes,
        reply: oneshot::Sender<Result<usize>>,
    },
    /// Shut down; `done` fires once the link is closed.
    Close { done: oneshot::Sender<()> },
}

/// Write waiting for the previous one to finish.
struct QueuedWrite {
    payload: Bytes,
    reply: oneshot::Sender<Result<usize>>,
}

/// Write currently running against the connected link.
struct InFlightWrite {
    reply: oneshot::Sender<Result<usize>>,
    future: BoxFuture<'static, Written>,
}

// ============================================================================
// Phase
// ============================================================================

/// Outcome of one discovery + connect attempt.
enum Outcome {
    NoChannel(LinkError),
    Refused(LinkError),
    Connected(LinkEvents),
}

/// What the supervisor is currently waiting on.
enum Phase {
    /// Discovery/connect in flight on a fresh link.
    Connecting {
        link: SharedLink,
        attempt: BoxFuture<'static, Outcome>,
    },
    /// Link open; forwarding its events.
    Connected { link: SharedLink, events: LinkEvents },
    /// Single pending retry.
    RetryScheduled(Pin<Box<Sleep>>),
    /// Shut down.
    Closed,
}

/// Progress made by the current phase.
enum Step {
    Attempted { link: SharedLink, outcome: Outcome },
    Link(Option<LinkEvent>),
    RetryDue,
}

impl Phase {
    /// Starts a connect attempt on a link fresh from `transport`.
    fn connecting(transport: &dyn Transport, address: &Address) -> Self {
        let link = Arc::new(AsyncMutex::new(transport.new_link(address)));
        let attempt = Box::pin(attempt(Arc::clone(&link), address.clone()));
        Self::Connecting { link, attempt }
    }

    /// Waits for the current phase to make progress.
    ///
    /// Cancel-safe: dropping the future leaves the phase intact.
    async fn step(&mut self) -> Step {
        match self {
            Self::Connecting { link, attempt } => {
                let outcome = attempt.await;
                Step::Attempted {
                    link: Arc::clone(link),
                    outcome,
                }
            }
            Self::Connected { events, .. } => Step::Link(events.recv().await),
            Self::RetryScheduled(timer) => {
                timer.as_mut().await;
                Step::RetryDue
            }
            Self::Closed => std::future::pending().await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::RetryScheduled(_) => "retry-scheduled",
            Self::Closed => "closed",
        }
    }
}

/// Runs discovery then connect on `link`.
async fn attempt(link: SharedLink, address: Address) -> Outcome {
    let mut link = link.lock().await;

    let channel = match link.find_channel(&address).await {
        Ok(channel) => channel,
        Err(e) => return Outcome::NoChannel(e),
    };

    trace!(address = %address, %channel, "Serial channel found");

    match link.connect(&address, channel).await {
        Ok(events) => Outcome::Connected(events),
        Err(e) => Outcome::Refused(e),
    }
}

/// Waits for the in-flight write, if any.
async fn in_flight(writing: &mut Option<InFlightWrite>) -> Written {
    match writing {
        Some(write) => (&mut write.future).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Connect/retry state machine for one address.
pub(crate) struct Supervisor {
    port: Arc<PortShared>,
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    phase: Phase,
    writes: VecDeque<QueuedWrite>,
    writing: Option<InFlightWrite>,
    /// Set once a close was requested; swallows late link events.
    closing: bool,
    /// Last connect-failure text written to the log.
    last_logged_error: Option<String>,
}

impl Supervisor {
    /// Builds a supervisor and its handle without starting it.
    ///
    /// The first connect attempt begins when [`Supervisor::run`] is polled,
    /// so callers can attach listeners in between.
    pub(crate) fn new(config: &PortConfig, transport: Arc<dyn Transport>) -> (PortHandle, Self) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let port = Arc::new(PortShared::new(
            config.address().clone(),
            config.reconnect_interval(),
            command_tx,
        ));

        let supervisor = Self {
            port: Arc::clone(&port),
            transport,
            commands: command_rx,
            phase: Phase::Closed,
            writes: VecDeque::new(),
            writing: None,
            closing: false,
            last_logged_error: None,
        };

        (PortHandle::from_shared(port), supervisor)
    }

    /// Event loop. Returns after a close request.
    pub(crate) async fn run(mut self) {
        debug!(address = %self.port.address, "Supervisor started");
        self.phase = Phase::connecting(&*self.transport, &self.port.address);

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Write { payload, reply }) => {
                        self.writes.push_back(QueuedWrite { payload, reply });
                        self.start_next_write();
                    }
                    Some(Command::Close { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },

                written = in_flight(&mut self.writing), if self.writing.is_some() => {
                    self.finish_write(written);
                }

                step = self.phase.step() => self.advance(step),
            }
        }

        debug!(address = %self.port.address, "Supervisor stopped");
    }
}

// ============================================================================
// Supervisor - Transitions
// ============================================================================

impl Supervisor {
    fn advance(&mut self, step: Step) {
        match step {
            Step::Attempted { link, outcome } => match outcome {
                Outcome::NoChannel(e) => {
                    self.log_connect_failure(Error::discovery(&self.port.address, e));
                    self.schedule_retry();
                }
                Outcome::Refused(e) => {
                    // No `closed` here: subscribers never saw `ready`.
                    self.log_connect_failure(Error::connect(&self.port.address, e));
                    self.schedule_retry();
                }
                Outcome::Connected(events) => self.on_connected(link, events),
            },
            Step::Link(event) => self.on_link_event(event),
            Step::RetryDue => {
                debug!(address = %self.port.address, "Reconnecting");
                self.phase = Phase::connecting(&*self.transport, &self.port.address);
            }
        }
    }

    fn on_connected(&mut self, link: SharedLink, events: LinkEvents) {
        self.last_logged_error = None;
        self.phase = Phase::Connected { link, events };
        self.port.set_open(true);

        info!(address = %self.port.address, "BTSerial - Open");
        self.port.listeners.emit_ready();
    }

    fn on_link_event(&mut self, event: Option<LinkEvent>) {
        if self.closing {
            trace!(address = %self.port.address, ?event, "Link event after close swallowed");
            return;
        }

        match event {
            Some(LinkEvent::Data(chunk)) => self.port.listeners.emit_data(&chunk),
            Some(LinkEvent::Failure(e)) => {
                let err = Error::runtime(&self.port.address, e);
                error!(address = %self.port.address, error = %err, "BTSerial - Failure");
                self.link_lost();
            }
            Some(LinkEvent::Closed(reason)) => {
                let err = Error::unexpected_close(&self.port.address);
                match reason {
                    Some(reason) => {
                        error!(address = %self.port.address, error = %err, %reason, "BTSerial - Closed");
                    }
                    None => error!(address = %self.port.address, error = %err, "BTSerial - Closed"),
                }
                self.link_lost();
            }
            None => {
                let err = Error::unexpected_close(&self.port.address);
                error!(address = %self.port.address, error = %err, "BTSerial - Closed");
                self.link_lost();
            }
        }
    }

    /// Connected link is gone: tell subscribers and retry with a new link.
    fn link_lost(&mut self) {
        self.fail_writes(Error::not_connected);
        self.port.set_open(false);
        self.port.listeners.emit_closed();
        self.schedule_retry();
    }

    /// Arms the single retry timer, replacing whatever the phase held.
    fn schedule_retry(&mut self) {
        let delay = self.port.reconnect_interval;
        self.phase = Phase::RetryScheduled(Box::pin(sleep(delay)));
        debug!(address = %self.port.address, delay = ?delay, "Reconnect scheduled");
    }

    /// Logs a discovery/connect failure unless it repeats the last one.
    ///
    /// Suppresses the log line only; the caller still schedules the retry.
    fn log_connect_failure(&mut self, err: Error) {
        let text = err.to_string();
        if self.last_logged_error.as_deref() == Some(text.as_str()) {
            trace!(address = %self.port.address, error = %text, "Repeated connect failure");
            return;
        }

        error!(address = %self.port.address, error = %text, "BTSerial - {err}");
        self.last_logged_error = Some(text);
    }
}

// ============================================================================
// Supervisor - Write
// ============================================================================

impl Supervisor {
    /// Starts the next queued write unless one is already running.
    ///
    /// Writes queued while no link is open fail with `NotConnected`.
    fn start_next_write(&mut self) {
        while self.writing.is_none() {
            let Some(QueuedWrite { payload, reply }) = self.writes.pop_front() else {
                return;
            };

            let Phase::Connected { link, .. } = &self.phase else {
                let _ = reply.send(Err(Error::not_connected(&self.port.address)));
                continue;
            };

            let link = Arc::clone(link);
            let address = self.port.address.clone();
            let future = Box::pin(async move {
                let mut link = link.lock().await;
                let result = link
                    .write(payload)
                    .await
                    .map_err(|e| Error::write(&address, e));
                (result, link.is_open())
            });

            self.writing = Some(InFlightWrite { reply, future });
        }
    }

    fn finish_write(&mut self, (result, open): Written) {
        let Some(write) = self.writing.take() else {
            return;
        };

        if matches!(self.phase, Phase::Connected { .. }) {
            self.port.set_open(open);
        }

        match &result {
            Ok(written) => trace!(address = %self.port.address, written, "Payload written"),
            Err(e) => debug!(address = %self.port.address, error = %e, "Write failed"),
        }

        let _ = write.reply.send(result);
        self.start_next_write();
    }

    /// Abandons the in-flight write and fails it and every queued one.
    fn fail_writes(&mut self, error: fn(&Address) -> Error) {
        let address = &self.port.address;

        if let Some(write) = self.writing.take() {
            // Dropping the future releases the link lock.
            drop(write.future);
            let _ = write.reply.send(Err(error(address)));
        }

        for QueuedWrite { reply, .. } in self.writes.drain(..) {
            let _ = reply.send(Err(error(address)));
        }
    }
}

// ============================================================================
// Supervisor - Close
// ============================================================================

impl Supervisor {
    /// Cancels any retry or attempt, closes the link best-effort, and parks in `Closed`.
    async fn shutdown(&mut self) {
        self.closing = true;
        self.fail_writes(Error::supervisor_gone);

        let phase = std::mem::replace(&mut self.phase, Phase::Closed);
        debug!(address = %self.port.address, phase = phase.name(), "Supervisor closing");

        match phase {
            Phase::Connecting { link, attempt } => {
                drop(attempt);
                close_link(&self.port.address, &link).await;
            }
            Phase::Connected { link, mut events } => {
                close_link(&self.port.address, &link).await;

                // Close notifications triggered by our own close.
                while let Ok(event) = events.try_recv() {
                    self.on_link_event(Some(event));
                }
            }
            Phase::RetryScheduled(_) | Phase::Closed => {}
        }

        self.port.set_open(false);
        info!(address = %self.port.address, "BTSerial - Closed");
    }
}

/// Closes `link`, logging and dropping any error.
async fn close_link(address: &Address, link: &SharedLink) {
    let mut link = link.lock().await;
    if let Err(e) = link.close().await {
        debug!(address = %address, error = %e, "Link close failed, ignoring");
    }
}


// ============================================================================
// Tests
// ============================================================================
