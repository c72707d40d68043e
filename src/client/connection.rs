//! The client's request loop.
//!
//! One task owns the loop. It keeps at most one exchange in flight,
//! batches captured input behind a per-kind debounce timer, and schedules
//! the next poll from the server's pending-wait hint. Callers talk to it
//! through a [`ConnectionHandle`].

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::ClientConfig;
use crate::protocol::{
    ClientMessage, ComponentId, EventKind, InputEvent, PendingWait, ProtocolError, ServerMessage,
};
use crate::tree::TreeSnapshot;

use super::placeholder::WidgetFactory;
use super::shadow::ShadowTree;
use super::transport::{Transport, TransportOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("component {target} does not capture {kind} input")]
    NotSubscribed {
        target: ComponentId,
        kind: EventKind,
    },

    #[error("connection is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    resyncs: AtomicU64,
}

/// Cloneable access to a running connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    input: mpsc::UnboundedSender<InputEvent>,
    shadow: Arc<Mutex<ShadowTree>>,
    cancel: CancellationToken,
    /// Cancelled when the [`Connection`] itself is dropped.
    stopped: CancellationToken,
    counters: Arc<Counters>,
}

impl ConnectionHandle {
    /// Queue a locally captured input event. Only kinds the target has
    /// subscribed to are accepted.
    pub fn capture(&self, event: InputEvent) -> Result<(), CaptureError> {
        if self.cancel.is_cancelled() {
            return Err(CaptureError::Closed);
        }
        if !self.shadow.lock().accepts(event.target, event.kind) {
            return Err(CaptureError::NotSubscribed {
                target: event.target,
                kind: event.kind,
            });
        }
        self.input.send(event).map_err(|_| CaptureError::Closed)
    }

    /// Stop the loop. Timers are dropped and an in-flight exchange is
    /// abandoned without its result ever being applied.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the loop has returned and released its transport
    /// and shadow tree, not merely when [`ConnectionHandle::close`] was
    /// requested.
    pub async fn closed(&self) {
        self.stopped.cancelled().await;
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.shadow.lock().snapshot()
    }

    /// Run `f` against the shadow tree.
    pub fn with_shadow<R>(&self, f: impl FnOnce(&ShadowTree) -> R) -> R {
        f(&self.shadow.lock())
    }

    pub fn requests_sent(&self) -> u64 {
        self.counters.requests.load(Ordering::SeqCst)
    }

    pub fn resyncs(&self) -> u64 {
        self.counters.resyncs.load(Ordering::SeqCst)
    }
}

type InFlight = Pin<Box<dyn Future<Output = TransportOutcome> + Send>>;

/// What the in-flight request carried, for retry and completion.
struct Pending {
    future: InFlight,
    start_session: bool,
    events: Vec<InputEvent>,
}

pub struct Connection {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    shadow: Arc<Mutex<ShadowTree>>,
    input: mpsc::UnboundedReceiver<InputEvent>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    queue: VecDeque<InputEvent>,
    in_flight: Option<Pending>,
    /// Debounce deadline for queued input.
    flush_at: Option<Instant>,
    /// Next scheduled poll.
    poll_at: Option<Instant>,
    /// Set until a start-session exchange succeeds.
    needs_start: bool,
    /// Declared last so it fires after every other field is dropped.
    _stopped: DropGuard,
}

impl Connection {
    pub fn new(
        transport: Arc<dyn Transport>,
        factory: Arc<dyn WidgetFactory>,
        config: ClientConfig,
    ) -> (Self, ConnectionHandle) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let shadow = Arc::new(Mutex::new(ShadowTree::new(factory)));
        let cancel = CancellationToken::new();
        let stopped = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let handle = ConnectionHandle {
            input: input_tx,
            shadow: shadow.clone(),
            cancel: cancel.clone(),
            stopped: stopped.clone(),
            counters: counters.clone(),
        };
        let connection = Self {
            transport,
            config,
            shadow,
            input: input_rx,
            cancel,
            counters,
            queue: VecDeque::new(),
            in_flight: None,
            flush_at: None,
            poll_at: None,
            needs_start: true,
            _stopped: stopped.drop_guard(),
        };
        (connection, handle)
    }

    /// Build the connection and run its loop on the current runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        factory: Arc<dyn WidgetFactory>,
        config: ClientConfig,
    ) -> ConnectionHandle {
        let (connection, handle) = Self::new(transport, factory, config);
        tokio::spawn(connection.run());
        handle
    }

    pub async fn run(mut self) {
        tracing::info!("Connection starting");
        self.send_next();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                outcome = wait_in_flight(&mut self.in_flight) => self.complete(outcome),
                event = self.input.recv() => match event {
                    Some(event) => self.enqueue(event),
                    None => break,
                },
                _ = sleep_until(self.flush_at) => {
                    self.flush_at = None;
                    self.flush();
                }
                _ = sleep_until(self.poll_at) => {
                    self.poll_at = None;
                    if self.in_flight.is_none() {
                        self.send_next();
                    }
                }
            }
        }

        if self.in_flight.take().is_some() {
            tracing::debug!("Abandoning in-flight exchange");
        }
        self.cancel.cancel();
        tracing::info!(
            requests = self.counters.requests.load(Ordering::SeqCst),
            "Connection closed"
        );
    }

    /// (Re)arm the debounce timer for a freshly captured event.
    fn enqueue(&mut self, event: InputEvent) {
        let throttle = self.config.throttle_for(event.kind);
        tracing::trace!(kind = %event.kind, target = %event.target, ?throttle, "Input captured");
        self.queue.push_back(event);
        self.flush_at = Some(Instant::now() + throttle);
    }

    /// Debounce fired: send now unless a request is already out, in which
    /// case the queue goes with the next cycle.
    fn flush(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        self.poll_at = None;
        self.send_next();
    }

    /// Open the next exchange. Callers guarantee nothing is in flight.
    fn send_next(&mut self) {
        let message = if self.needs_start {
            if !self.queue.is_empty() {
                tracing::debug!(dropped = self.queue.len(), "Dropping input queued before session start");
                self.queue.clear();
            }
            ClientMessage::start_session()
        } else {
            ClientMessage::with_events(self.queue.drain(..).collect())
        };
        self.flush_at = None;
        self.poll_at = None;

        let start_session = message.start_session;
        let events = message.events.clone();
        let transport = self.transport.clone();
        let cancel = self.cancel.child_token();
        let future: InFlight = Box::pin(async move { transport.exchange(message, cancel).await });

        let sent = self.counters.requests.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(request = sent, start_session, events = events.len(), "Sending exchange");
        self.in_flight = Some(Pending {
            future,
            start_session,
            events,
        });
    }

    fn complete(&mut self, (pending, outcome): (Pending, TransportOutcome)) {
        match outcome {
            TransportOutcome::Success(reply) => {
                let received = Instant::now();
                match self.apply(&reply, pending.start_session) {
                    Ok(()) => {
                        if pending.start_session {
                            self.needs_start = false;
                        }
                        self.schedule(reply.pending_wait(), received);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Render events do not fit the shadow tree");
                        self.resync(pending.start_session);
                    }
                }
            }
            TransportOutcome::Error(e) if e.requires_resync() => {
                tracing::warn!(error = %e, "Server dropped the session");
                self.resync(pending.start_session);
            }
            TransportOutcome::Error(e) => self.retry(pending, e.to_string()),
            TransportOutcome::Timeout(after) => {
                self.retry(pending, format!("timed out after {after:?}"))
            }
            TransportOutcome::Canceled => {
                tracing::debug!("Exchange canceled");
            }
        }
    }

    fn apply(&self, reply: &ServerMessage, start_session: bool) -> Result<(), ProtocolError> {
        let events = reply.render_events()?;
        let mut shadow = self.shadow.lock();
        if start_session {
            shadow.reset();
        }
        shadow.apply(&events)?;
        tracing::debug!(
            events = events.len(),
            components = shadow.len(),
            pending_wait = reply.pending_wait,
            "Applied render events"
        );
        Ok(())
    }

    /// Plan the next request after a successful exchange.
    fn schedule(&mut self, hint: PendingWait, received: Instant) {
        if !self.queue.is_empty() && self.flush_at.is_none() {
            // Input captured while the request was out.
            self.send_next();
            return;
        }
        self.poll_at = match hint {
            PendingWait::After(wait) => Instant::now().checked_add(wait.saturating_sub(received.elapsed())),
            PendingWait::Indefinite => None,
        };
    }

    /// Transport failure: put the unsent input back in front and try again
    /// after the retry delay.
    fn retry(&mut self, pending: Pending, reason: String) {
        tracing::warn!(
            error = %reason,
            retry_in = ?self.config.retry_delay(),
            "Exchange failed, retrying"
        );
        for event in pending.events.into_iter().rev() {
            self.queue.push_front(event);
        }
        self.flush_at = None;
        self.poll_at = Some(Instant::now() + self.config.retry_delay());
    }

    /// Throw away local state and ask for a fresh session. A failed start
    /// is retried after the retry delay rather than immediately.
    fn resync(&mut self, after_failed_start: bool) {
        let resyncs = self.counters.resyncs.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(resyncs, dropped = self.queue.len(), "Resynchronizing with a fresh session");
        self.shadow.lock().reset();
        self.queue.clear();
        self.needs_start = true;
        if after_failed_start {
            self.flush_at = None;
            self.poll_at = Some(Instant::now() + self.config.retry_delay());
        } else {
            self.send_next();
        }
    }
}

/// Await the in-flight exchange, or never resolve if there is none.
async fn wait_in_flight(in_flight: &mut Option<Pending>) -> (Pending, TransportOutcome) {
    match in_flight {
        Some(pending) => {
            let outcome = pending.future.as_mut().await;
            match in_flight.take() {
                Some(pending) => (pending, outcome),
                None => std::future::pending().await,
            }
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
