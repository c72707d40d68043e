//! Per-session cooperative task scheduler.
//!
//! All work touching a session's tree runs as a task on that session's
//! scheduler. Tasks never preempt each other. Time only matters when
//! [`TaskScheduler::execute`] or [`TaskScheduler::pending_wait`] look at the
//! clock, which keeps delayed work deterministic under a [`ManualClock`].

mod clock;

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};

use crate::collector::InvariantViolation;
use crate::protocol::PendingWait;

/// Default cap on the pending-wait hint while a poll is outstanding.
pub const DEFAULT_POLLING_TIMEOUT: Duration = Duration::from_millis(1000);

/// Deadlines that would overflow the clock are clamped to this distance.
pub const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Why a task did not complete.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Ordinary failure; reported to the error sink, the next task runs.
    #[error(transparent)]
    Application(anyhow::Error),

    /// The session's bookkeeping is corrupt; `execute` stops immediately.
    #[error("invariant violation: {0}")]
    Invariant(InvariantViolation),
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        let violation = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<InvariantViolation>())
            .cloned();
        match violation {
            Some(violation) => TaskError::Invariant(violation),
            None => TaskError::Application(err),
        }
    }
}

impl From<InvariantViolation> for TaskError {
    fn from(violation: InvariantViolation) -> Self {
        TaskError::Invariant(violation)
    }
}

/// Receives application errors from failed tasks.
pub trait ErrorSink: Send + Sync {
    fn task_failed(&self, label: &str, error: &anyhow::Error);
}

/// Logs task failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn task_failed(&self, label: &str, error: &anyhow::Error) {
        tracing::error!(task = %label, error = %format!("{error:#}"), "Scheduled task failed");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

type TaskFn<C> = Box<dyn FnOnce(&mut C) -> Result<(), TaskError> + Send>;

struct Task<C> {
    id: TaskId,
    label: String,
    run: TaskFn<C>,
}

struct Delayed<C> {
    deadline: Instant,
    task: Task<C>,
}

impl<C> PartialEq for Delayed<C> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.task.id == other.task.id
    }
}

impl<C> Eq for Delayed<C> {}

impl<C> PartialOrd for Delayed<C> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for Delayed<C> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Min-heap on deadline, FIFO among equal deadlines.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.task.id.0.cmp(&self.task.id.0))
    }
}

struct Queues<C> {
    immediate: VecDeque<Task<C>>,
    delayed: BinaryHeap<Delayed<C>>,
}

impl<C> Queues<C> {
    fn promote_due(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        while self
            .delayed
            .peek()
            .is_some_and(|delayed| delayed.deadline <= now)
        {
            if let Some(delayed) = self.delayed.pop() {
                self.immediate.push_back(delayed.task);
                promoted += 1;
            }
        }
        promoted
    }
}

struct Shared<C> {
    queues: Mutex<Queues<C>>,
    polls: AtomicUsize,
    next_id: AtomicU64,
}

/// Cloneable, `Send` access to a scheduler's queues.
///
/// Tasks use it to schedule follow-up work while `execute` is running;
/// external async work uses it to hold a poll open until it completes.
pub struct SchedulerHandle<C> {
    shared: Arc<Shared<C>>,
    clock: Arc<dyn Clock>,
}

impl<C> Clone for SchedulerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<C> fmt::Debug for SchedulerHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("polls", &self.shared.polls.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<C> SchedulerHandle<C> {
    /// Schedule `task` to run immediately (zero delay) or once `delay` has
    /// elapsed on the scheduler's clock.
    pub fn enqueue<F>(&self, label: impl Into<String>, delay: Duration, task: F) -> TaskId
    where
        F: FnOnce(&mut C) -> Result<(), TaskError> + Send + 'static,
    {
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let task = Task {
            id,
            label: label.into(),
            run: Box::new(task),
        };
        tracing::trace!(task = %task.label, delay_ms = delay.as_millis() as u64, "Task enqueued");

        let mut queues = self.shared.queues.lock();
        if delay.is_zero() {
            queues.immediate.push_back(task);
        } else {
            let now = self.clock.now();
            let deadline = now.checked_add(delay).unwrap_or_else(|| {
                tracing::warn!(task = %task.label, ?delay, "Delay overflows the clock, clamping");
                now + FAR_FUTURE
            });
            queues.delayed.push(Delayed { deadline, task });
        }
        id
    }

    /// Remove a task that has not started yet. Returns whether it was found.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut queues = self.shared.queues.lock();
        let before = queues.immediate.len() + queues.delayed.len();
        queues.immediate.retain(|task| task.id != id);
        queues.delayed.retain(|delayed| delayed.task.id != id);
        before != queues.immediate.len() + queues.delayed.len()
    }

    /// Mark an external wait as in flight.
    pub fn request_polling(&self) {
        self.shared.polls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release_polling(&self) {
        let released = self
            .shared
            .polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |polls| {
                polls.checked_sub(1)
            });
        if released.is_err() {
            tracing::warn!("release_polling called without a matching request_polling");
        }
    }

    pub fn outstanding_polls(&self) -> usize {
        self.shared.polls.load(Ordering::SeqCst)
    }
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteStats {
    pub executed: usize,
    pub failed: usize,
    /// `true` when the timeframe ran out before the queue drained.
    pub interrupted: bool,
}

pub struct TaskScheduler<C> {
    handle: SchedulerHandle<C>,
    polling_timeout: Duration,
    error_sink: Arc<dyn ErrorSink>,
}

impl<C> TaskScheduler<C> {
    pub fn new(clock: Arc<dyn Clock>, polling_timeout: Duration) -> Self {
        Self {
            handle: SchedulerHandle {
                shared: Arc::new(Shared {
                    queues: Mutex::new(Queues {
                        immediate: VecDeque::new(),
                        delayed: BinaryHeap::new(),
                    }),
                    polls: AtomicUsize::new(0),
                    next_id: AtomicU64::new(0),
                }),
                clock,
            },
            polling_timeout,
            error_sink: Arc::new(LogErrorSink),
        }
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = sink;
        self
    }

    pub fn handle(&self) -> SchedulerHandle<C> {
        self.handle.clone()
    }

    pub fn polling_timeout(&self) -> Duration {
        self.polling_timeout
    }

    pub fn enqueue<F>(&self, label: impl Into<String>, delay: Duration, task: F) -> TaskId
    where
        F: FnOnce(&mut C) -> Result<(), TaskError> + Send + 'static,
    {
        self.handle.enqueue(label, delay, task)
    }

    pub fn cancel(&self, id: TaskId) -> bool {
        self.handle.cancel(id)
    }

    pub fn request_polling(&self) {
        self.handle.request_polling();
    }

    pub fn release_polling(&self) {
        self.handle.release_polling();
    }

    /// Run immediate tasks, promoting delayed tasks whose deadline has
    /// passed, until the queue is empty or `timeframe` is used up.
    ///
    /// Application errors go to the error sink and execution continues.
    /// An invariant violation stops execution and is returned.
    pub fn execute(
        &self,
        ctx: &mut C,
        timeframe: Option<Duration>,
    ) -> Result<ExecuteStats, InvariantViolation> {
        let clock = &self.handle.clock;
        let started = clock.now();
        let mut stats = ExecuteStats::default();

        loop {
            let next = {
                let mut queues = self.handle.shared.queues.lock();
                if queues.immediate.is_empty() {
                    queues.promote_due(clock.now());
                }
                queues.immediate.pop_front()
            };
            let Some(task) = next else {
                break;
            };

            tracing::trace!(task = %task.label, "Running task");
            match (task.run)(ctx) {
                Ok(()) => {}
                Err(TaskError::Application(err)) => {
                    stats.failed += 1;
                    self.error_sink.task_failed(&task.label, &err);
                }
                Err(TaskError::Invariant(violation)) => {
                    tracing::error!(task = %task.label, %violation, "Invariant violated, aborting execution");
                    return Err(violation);
                }
            }
            stats.executed += 1;

            if let Some(limit) = timeframe {
                if clock.now().saturating_duration_since(started) >= limit {
                    stats.interrupted = !self.is_idle();
                    break;
                }
            }
        }

        Ok(stats)
    }

    /// How long the caller may wait before work is due.
    pub fn pending_wait(&self) -> PendingWait {
        let queues = self.handle.shared.queues.lock();
        if !queues.immediate.is_empty() {
            return PendingWait::NOW;
        }

        let polling = self.handle.outstanding_polls() > 0;
        match queues.delayed.peek() {
            Some(delayed) => {
                let wait = delayed
                    .deadline
                    .saturating_duration_since(self.handle.clock.now());
                if polling {
                    PendingWait::After(wait.min(self.polling_timeout))
                } else {
                    PendingWait::After(wait)
                }
            }
            None if polling => PendingWait::After(self.polling_timeout),
            None => PendingWait::Indefinite,
        }
    }

    fn is_idle(&self) -> bool {
        let queues = self.handle.shared.queues.lock();
        queues.immediate.is_empty() && queues.delayed.is_empty()
    }

    pub fn queued(&self) -> usize {
        let queues = self.handle.shared.queues.lock();
        queues.immediate.len() + queues.delayed.len()
    }
}
