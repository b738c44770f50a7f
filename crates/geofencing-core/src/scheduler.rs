//! One-shot delayed re-checks.
//!
//! A [`DelayScheduler`] owns a single worker task holding a queue of
//! [`DelayedCheck`]s ordered by due time. When a check becomes due the worker
//! hands it to the registered [`DelayedCheckHandler`] on its own task, so a
//! slow check never holds up the queue.
//!
//! Checks cannot be cancelled once scheduled. The handler is held weakly:
//! when its owner is gone the worker drops due checks and keeps draining.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::types::{DeviceId, Direction, EventId, Minor};

/// Errors raised by the scheduler lifecycle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// [`DelayScheduler::start`] was called twice.
    #[error("Scheduler is already running")]
    AlreadyStarted,

    /// The scheduler was never started or has been stopped.
    #[error("Scheduler is not running")]
    NotRunning,

    /// The due time of a check cannot be represented.
    #[error("Delay of {0:?} is out of range")]
    DelayOutOfRange(Duration),
}

/// A re-check of one event for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedCheck {
    /// Device that caused the trigger.
    pub device_id: DeviceId,
    /// Geofence of the event.
    pub minor: Minor,
    /// Event to fire.
    pub event_id: EventId,
    /// Direction whose condition must still hold.
    pub direction: Direction,
}

/// Receives checks when they become due.
#[async_trait]
pub trait DelayedCheckHandler: Send + Sync + 'static {
    /// Re-validates and, if still applicable, fires the check.
    async fn run_delayed_check(&self, check: DelayedCheck);
}

#[derive(Debug)]
struct Entry {
    due: Instant,
    seq: u64,
    check: DelayedCheck,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

enum Command {
    Schedule(Entry),
    Shutdown,
}

enum State {
    Idle,
    Running {
        commands: mpsc::UnboundedSender<Command>,
        worker: JoinHandle<()>,
        next_seq: u64,
    },
    Stopped,
}

/// Runs delayed checks on a long-lived worker task.
pub struct DelayScheduler {
    state: Mutex<State>,
}

impl std::fmt::Debug for DelayScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            State::Idle => "idle",
            State::Running { .. } => "running",
            State::Stopped => "stopped",
        };
        f.debug_struct("DelayScheduler")
            .field("state", &state)
            .finish()
    }
}

impl Default for DelayScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayScheduler {
    /// Creates a scheduler that is not yet running.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
        }
    }

    /// Spawns the worker on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyStarted`] unless the scheduler is
    /// idle.
    pub fn start(&self, handler: Weak<dyn DelayedCheckHandler>) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, State::Idle) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(receiver, handler));
        *state = State::Running {
            commands,
            worker,
            next_seq: 0,
        };

        tracing::debug!("Delay scheduler started");
        Ok(())
    }

    /// Returns `true` while the worker is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            State::Running { .. }
        )
    }

    /// Queues `check` to run after `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotRunning`] if the worker is not running
    /// and [`SchedulerError::DelayOutOfRange`] if `delay` overflows the clock.
    pub fn schedule(&self, check: DelayedCheck, delay: Duration) -> Result<(), SchedulerError> {
        let due = Instant::now()
            .checked_add(delay)
            .ok_or(SchedulerError::DelayOutOfRange(delay))?;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let State::Running {
            commands, next_seq, ..
        } = &mut *state
        else {
            return Err(SchedulerError::NotRunning);
        };

        let entry = Entry {
            due,
            seq: *next_seq,
            check,
        };
        *next_seq += 1;

        commands
            .send(Command::Schedule(entry))
            .map_err(|_| SchedulerError::NotRunning)
    }

    /// Stops the worker and waits for it to exit. Checks not yet due are
    /// dropped; checks already handed to the handler run to completion.
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, State::Stopped)
        };

        if let State::Running {
            commands, worker, ..
        } = previous
        {
            let _ = commands.send(Command::Shutdown);
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Delay scheduler worker ended abnormally");
            }
            tracing::debug!("Delay scheduler stopped");
        }
    }
}

async fn wait_until(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

async fn run_worker(
    mut commands: mpsc::UnboundedReceiver<Command>,
    handler: Weak<dyn DelayedCheckHandler>,
) {
    let mut queue: BinaryHeap<Reverse<Entry>> = BinaryHeap::new();

    loop {
        let next_due = queue.peek().map(|Reverse(entry)| entry.due);

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Schedule(entry)) => queue.push(Reverse(entry)),
                Some(Command::Shutdown) | None => break,
            },
            () = wait_until(next_due) => {
                let now = Instant::now();
                while queue.peek().is_some_and(|Reverse(entry)| entry.due <= now) {
                    let Some(Reverse(entry)) = queue.pop() else { break };
                    dispatch(&handler, entry.check);
                }
            }
        }
    }

    if !queue.is_empty() {
        tracing::info!(pending = queue.len(), "Dropping delayed checks on shutdown");
    }
}

fn dispatch(handler: &Weak<dyn DelayedCheckHandler>, check: DelayedCheck) {
    let Some(handler) = handler.upgrade() else {
        tracing::debug!(
            device_id = check.device_id,
            minor = check.minor,
            event_id = check.event_id,
            "Handler gone, delayed check dropped"
        );
        return;
    };

    tokio::spawn(async move {
        handler.run_delayed_check(check).await;
    });
}
