//! Entity: one scheduled unit of work and its lifecycle.
//!
//! Wraps a user [`Executor`](crate::scheduler::Executor) with status, timing
//! and result tracking. Status only ever advances:
//!
//! ```text
//! Waiting ──► Running ──► Done | Aborted
//!    │           │
//!    │           └──► Canceling ──► Aborted
//!    └──► Canceled  (never ran; abandon() called exactly once)
//! ```
//!
//! `Aborted` means the executor returned while its running context was
//! cancelled (by the user, an external source, or scheduler shutdown); the
//! recorded error tells which. `Canceled` strictly means the executor never
//! ran.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::context::CancelSource;
use crate::error::Error;
use crate::scheduler::{Core, Executor};

/// Lifecycle states of an [`Entity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Pushed (or created) and waiting for a worker.
    Waiting,
    /// Executing on a worker.
    Running,
    /// Cancel requested while running; waiting for the executor to return.
    Canceling,
    /// Executor returned normally.
    Done,
    /// Cancelled before any execution attempt; `abandon()` was called.
    Canceled,
    /// Executor returned while its context was cancelled.
    Aborted,
}

impl EntityStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntityStatus::Done | EntityStatus::Canceled | EntityStatus::Aborted
        )
    }
}

/// Snapshot of an entity's status and outcome.
#[derive(Debug, Clone)]
pub struct EntityResult {
    pub status: EntityStatus,
    /// The executor's returned error, or the cancel reason.
    pub err: Option<Error>,
    /// Time spent between push and pickup.
    pub waiting: Duration,
    /// Time spent executing.
    pub executing: Duration,
}

/// Per-entity scheduling options.
#[derive(Default)]
pub struct EntityOptions {
    /// External cancel source: when it fires, the entity is cancelled with
    /// the source's error, without touching the scheduler.
    pub external: Option<Arc<CancelSource>>,
    /// Delay before the entity becomes eligible to run.
    pub delay: Duration,
}

struct EntityState {
    status: EntityStatus,
    err: Option<Error>,
    waiting: Duration,
    executing: Duration,
    created: Instant,
    run_at: Option<Instant>,
    running_cancel: Option<CancellationToken>,
    listener_id: Option<u64>,
}

/// A scheduled unit of work: executor plus lifecycle, timing and result.
///
/// Created by [`Scheduler::new_entity`](crate::Scheduler::new_entity); one
/// entity is pushed at most once.
pub struct Entity {
    pub(crate) id: u64,
    pub(crate) scheduler: std::sync::Weak<Core>,
    pub(crate) executor: Box<dyn Executor>,
    pub(crate) external: Option<Arc<CancelSource>>,
    pub(crate) delay: Duration,
    done: CancellationToken,
    state: RwLock<EntityState>,
}

impl Entity {
    pub(crate) fn new(
        id: u64,
        scheduler: std::sync::Weak<Core>,
        executor: Box<dyn Executor>,
        options: EntityOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            scheduler,
            executor,
            external: options.external,
            delay: options.delay,
            done: CancellationToken::new(),
            state: RwLock::new(EntityState {
                status: EntityStatus::Waiting,
                err: None,
                waiting: Duration::ZERO,
                executing: Duration::ZERO,
                created: Instant::now(),
                run_at: None,
                running_cancel: None,
                listener_id: None,
            }),
        })
    }

    /// Pushes this entity to its scheduler; same as
    /// [`Scheduler::push`](crate::Scheduler::push).
    pub fn dispatch(self: &Arc<Self>) -> Result<(), Error> {
        match self.scheduler.upgrade() {
            Some(core) => core.push(self),
            None => Err(Error::invalid_status("dispatch")),
        }
    }

    /// Waits until the entity reaches a terminal state.
    pub async fn done(&self) {
        self.done.cancelled().await;
    }

    /// Whether the entity has reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Snapshot of status, error and timings.
    pub fn result(&self) -> EntityResult {
        let state = self.state.read();
        EntityResult {
            status: state.status,
            err: state.err.clone(),
            waiting: state.waiting,
            executing: state.executing,
        }
    }

    /// Requests cancellation with the default [`Error::Canceled`] reason.
    ///
    /// Idempotent: repeated calls, or calls on a terminal entity, change
    /// nothing.
    pub fn cancel(&self) {
        self.cancel_with(Error::Canceled);
    }

    /// Requests cancellation, recording `err` as the reason.
    ///
    /// A waiting entity goes straight to `Canceled` and its executor's
    /// `abandon` runs; a running entity moves to `Canceling` and its running
    /// context is cancelled, cooperatively ending the executor.
    pub fn cancel_with(&self, err: Error) {
        let mut abandoned = false;
        {
            let mut state = self.state.write();
            match state.status {
                EntityStatus::Waiting => {
                    state.status = EntityStatus::Canceled;
                    state.err = Some(err);
                    abandoned = true;
                }
                EntityStatus::Running => {
                    state.status = EntityStatus::Canceling;
                    state.err = Some(err);
                    if let Some(cancel) = state.running_cancel.clone() {
                        cancel.cancel();
                    }
                }
                _ => {}
            }
        }
        if abandoned {
            self.executor.abandon();
            self.dispose();
        }
    }

    /// Runs the executor once. Called by a worker; a no-op unless the entity
    /// is still waiting.
    pub(crate) async fn execute(self: Arc<Self>, shared: CancellationToken) {
        let running_ctx = {
            let mut state = self.state.write();
            if state.status != EntityStatus::Waiting {
                return;
            }
            let ctx = shared.child_token();
            let now = Instant::now();
            state.running_cancel = Some(ctx.clone());
            state.run_at = Some(now);
            state.waiting = now - state.created;
            state.status = EntityStatus::Running;
            ctx
        };

        let err = self.executor.execute(running_ctx.clone()).await.err();
        let aborted = running_ctx.is_cancelled();

        {
            let mut state = self.state.write();
            let now = Instant::now();
            state.executing = state.run_at.map(|t| now - t).unwrap_or_default();
            state.status = if aborted {
                EntityStatus::Aborted
            } else {
                EntityStatus::Done
            };
            // The executor's own verdict wins over a cancel reason recorded
            // while it was winding down.
            if err.is_some() || state.status == EntityStatus::Done {
                state.err = err;
            }
        }
        self.dispose();
    }

    pub(crate) fn set_listener(&self, id: u64) {
        self.state.write().listener_id = Some(id);
    }

    /// Fires `done` and detaches the entity from the scheduler's registries.
    fn dispose(&self) {
        self.done.cancel();
        let listener_id = self.state.write().listener_id.take();
        if let Some(core) = self.scheduler.upgrade() {
            if let Some(id) = listener_id {
                core.listeners.remove(id);
            }
            core.entities.remove(self.id);
        }
    }
}
