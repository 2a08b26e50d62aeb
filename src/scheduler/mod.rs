//! # Scheduler: executing user work on an elastic worker pool.
//!
//! [`Scheduler`] runs user-supplied [`Executor`]s with per-task controls and
//! a graceful shutdown story:
//!
//! - an elastic worker pool, growing under load up to a cap and shrinking
//!   back when idle ([`worker`]);
//! - delayed dispatch ([`delay`]);
//! - external cancel sources watched per entity ([`listener`]);
//! - per-entity status, timings and result ([`entity`]);
//! - [`Scheduler::stop`] cancels everything outstanding and waits for every
//!   pushed entity to reach a terminal state.
//!
//! ```no_run
//! use std::time::Duration;
//! use conflux::{ExecutorFn, Scheduler, SchedulerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), conflux::Error> {
//!     let scheduler = Scheduler::new(SchedulerOptions::default())?;
//!     scheduler.start();
//!
//!     let entity = scheduler.new_entity(
//!         ExecutorFn::new(|ctx| async move {
//!             if ctx.is_cancelled() { return Err(conflux::Error::Canceled); }
//!             println!("doing work");
//!             Ok(())
//!         }),
//!         Default::default(),
//!     );
//!     scheduler.push(&entity)?;
//!     entity.done().await;
//!
//!     scheduler.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module layout
//! - **mod.rs**: the public facade; owns the status gate, the entity
//!   registry and the three managers; push/schedule split; graceful stop.
//! - **entity.rs**: per-task state machine and result bookkeeping.
//! - **worker.rs**: elastic pool and dispatch.
//! - **delay.rs**: deadline set driving delayed dispatch.
//! - **listener.rs**: external cancel sources translated into entity cancels.

mod delay;
mod entity;
mod listener;
mod worker;

pub use entity::{Entity, EntityOptions, EntityResult, EntityStatus};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::registry::Registry;
use crate::status;

use delay::DelayManager;
use listener::ListenerManager;
use worker::WorkerManager;

/// User-supplied work scheduled through a [`Scheduler`].
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Runs the work. `ctx` fires when the scheduler needs the executor to
    /// wind down; implementations must honor it cooperatively. The returned
    /// error is recorded on the entity's result, never raised further.
    async fn execute(&self, ctx: CancellationToken) -> Result<(), Error>;

    /// Called exactly once iff the entity is dropped without ever running
    /// (cancelled while waiting, or the scheduler stopped first).
    fn abandon(&self) {}
}

/// Function-backed [`Executor`], for composing executors from closures
/// without a dedicated type.
pub struct ExecutorFn<F> {
    run: F,
    abandon: Option<Box<dyn Fn() + Send + Sync + 'static>>,
}

impl<F, Fut> ExecutorFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    pub fn new(run: F) -> Self {
        Self { run, abandon: None }
    }

    /// Attaches an abandon callback.
    pub fn with_abandon(run: F, abandon: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            run,
            abandon: Some(Box::new(abandon)),
        }
    }
}

#[async_trait]
impl<F, Fut> Executor for ExecutorFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    async fn execute(&self, ctx: CancellationToken) -> Result<(), Error> {
        (self.run)(ctx).await
    }

    fn abandon(&self) {
        if let Some(f) = &self.abandon {
            f();
        }
    }
}

/// Construction-time options for [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Worker pool upper bound. Default: twice the host's available
    /// parallelism. Zero is rejected.
    pub pool_size: usize,
    /// How often idle workers are retired. Default 120 s.
    pub pool_reduce_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            pool_size: cpus * 2,
            pool_reduce_interval: Duration::from_secs(120),
        }
    }
}

pub(crate) struct Core {
    status: status::Controller,
    pub(crate) entities: Registry<Arc<Entity>>,
    pub(crate) listeners: ListenerManager,
    delay: DelayManager,
    workers: WorkerManager,
}

/// Elastic execution pool with per-task lifecycle and graceful shutdown.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<Core>,
}

impl Scheduler {
    /// Creates a scheduler. Fails eagerly with [`Error::Config`] on invalid
    /// options (e.g. a zero pool size).
    pub fn new(options: SchedulerOptions) -> Result<Self, Error> {
        if options.pool_size == 0 {
            return Err(Error::Config {
                reason: "pool size must be non-zero".to_string(),
            });
        }
        Ok(Self {
            core: Arc::new(Core {
                status: status::Controller::new(),
                entities: Registry::new(),
                listeners: ListenerManager::new(),
                delay: DelayManager::new(),
                workers: WorkerManager::new(options.pool_size, options.pool_reduce_interval),
            }),
        })
    }

    /// Starts accepting pushes. Thread safe; one caller wins, the rest
    /// return quietly.
    pub fn start(&self) {
        if !self.core.status.begin_start() {
            return;
        }
        // Managers spawn lazily on first use; starting is just the gate.
        self.core.status.end_start();
    }

    /// Stops the scheduler gracefully: every pushed entity is cancelled or
    /// allowed to wind down, and this call returns only after all of them
    /// reached a terminal state. Idempotent.
    pub async fn stop(&self) {
        let core = &self.core;
        if !core.status.begin_stop().await {
            return;
        }
        core.delay.shutdown().await;
        core.listeners.shutdown().await;
        core.workers.shutdown().await;

        let mut outstanding = core.entities.snapshot();
        // Entities still waiting on their delay never reached the registry;
        // without this sweep their done() would never fire.
        outstanding.extend(core.delay.pending());
        for entity in &outstanding {
            let entity = entity.clone();
            tokio::spawn(async move { entity.cancel() });
        }
        join_all(outstanding.iter().map(|e| e.done())).await;
        core.status.end_stop();
    }

    /// Creates an entity wrapping `executor`. The entity is inert until
    /// [`push`](Self::push)ed.
    pub fn new_entity(
        &self,
        executor: impl Executor,
        options: EntityOptions,
    ) -> Arc<Entity> {
        Entity::new(
            self.core.entities.next_id(),
            Arc::downgrade(&self.core),
            Box::new(executor),
            options,
        )
    }

    /// Submits an entity for execution, honoring its delay and external
    /// cancel options. Fails with [`Error::InvalidStatus`] unless the
    /// scheduler is running.
    pub fn push(&self, entity: &Arc<Entity>) -> Result<(), Error> {
        self.core.push(entity)
    }
}

impl Core {
    pub(crate) fn push(&self, entity: &Arc<Entity>) -> Result<(), Error> {
        if !self.status.admit() {
            return Err(self.status.status_error(Error::invalid_status("push")));
        }
        if !entity.delay.is_zero() {
            self.delay.add(entity.clone());
        } else {
            self.schedule(entity);
        }
        self.status.release();
        Ok(())
    }

    /// Registers the entity and hands it to the worker pool.
    pub(crate) fn schedule(&self, entity: &Arc<Entity>) {
        if entity.is_done() {
            // Cancelled while it sat in the delay set; nothing left to run.
            return;
        }
        self.entities.insert(entity.id, entity.clone());
        if entity.external.is_some() {
            self.listeners.add(entity);
        }
        self.workers.push(entity.clone());
    }
}
