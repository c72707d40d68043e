//! One client's server-side state and its request/response exchange.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::collector::{EventCollector, InvariantViolation};
use crate::protocol::{InputEvent, ServerMessage};
use crate::scheduler::{Clock, ErrorSink, TaskError, TaskScheduler};
use crate::tree::{ClassRegistry, Tree};

use super::context::{Application, UiContext};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// Everything a session needs besides the application itself.
#[derive(Clone)]
pub struct SessionSettings {
    pub clock: Arc<dyn Clock>,
    pub polling_timeout: Duration,
    pub error_sink: Arc<dyn ErrorSink>,
}

/// Exchange phases, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Receive,
    ApplyInput,
    Drain,
    Respond,
}

pub struct Session {
    token: String,
    ctx: UiContext,
    scheduler: TaskScheduler<UiContext>,
    collector: Arc<EventCollector>,
    last_seen: Instant,
    exchanges: u64,
}

impl Session {
    /// Build a fresh tree, let the application populate it, and return the
    /// session together with the response carrying the initial render.
    pub fn start(
        token: String,
        classes: Arc<ClassRegistry>,
        app: Arc<dyn Application>,
        settings: &SessionSettings,
    ) -> Result<(Self, ServerMessage), SessionError> {
        let scheduler = TaskScheduler::new(settings.clock.clone(), settings.polling_timeout)
            .with_error_sink(settings.error_sink.clone());
        let collector = Arc::new(EventCollector::new());
        let mut tree = Tree::new(classes);
        tree.subscribe(collector.clone());

        let mut session = Self {
            token,
            ctx: UiContext::new(tree, scheduler.handle()),
            scheduler,
            collector,
            last_seen: Instant::now(),
            exchanges: 0,
        };

        session.scheduler.enqueue("start-session", Duration::ZERO, move |ctx| {
            let root = ctx.tree_mut().create_root()?;
            app.start(ctx, root).map_err(TaskError::from)
        });
        let response = session.drain_exchange()?;
        tracing::info!(
            session = %session.token,
            components = session.ctx.tree().len(),
            "Session started"
        );
        Ok((session, response))
    }

    /// RECEIVE -> APPLY-INPUT -> DRAIN -> RESPOND for one request.
    pub fn exchange(&mut self, events: Vec<InputEvent>) -> Result<ServerMessage, SessionError> {
        self.trace_phase(Phase::Receive);
        self.last_seen = Instant::now();

        self.trace_phase(Phase::ApplyInput);
        for event in events {
            let label = format!("input {} -> {}", event.kind, event.target);
            self.scheduler.enqueue(label, Duration::ZERO, move |ctx| {
                ctx.dispatch(&event).map_err(TaskError::from)
            });
        }

        self.drain_exchange()
    }

    fn drain_exchange(&mut self) -> Result<ServerMessage, SessionError> {
        self.collector.begin_exchange()?;

        self.trace_phase(Phase::Drain);
        let executed = self.scheduler.execute(&mut self.ctx, None);
        self.ctx.prune_handlers();
        let drained = self.collector.finish_exchange();
        let stats = executed?;
        let events = drained?;

        self.trace_phase(Phase::Respond);
        self.exchanges += 1;
        let pending_wait = self.scheduler.pending_wait();
        tracing::debug!(
            session = %self.token,
            exchange = self.exchanges,
            tasks = stats.executed,
            failed = stats.failed,
            events = events.len(),
            pending_wait = pending_wait.to_wire(),
            "Exchange complete"
        );
        Ok(ServerMessage::new(&events, pending_wait))
    }

    fn trace_phase(&self, phase: Phase) {
        tracing::trace!(session = %self.token, ?phase, "Exchange phase");
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn context(&self) -> &UiContext {
        &self.ctx
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    /// True once the session can only be replaced, never continued.
    pub fn is_poisoned(&self) -> bool {
        self.collector.poisoned().is_some()
    }
}
