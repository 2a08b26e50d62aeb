//! # conflux
//!
//! **Conflux** is a small family of interlocking concurrency primitives for
//! building supervised async services: background tasks that start, stop and
//! drain cleanly, composed through order-preserving elastic queues and
//! event-driven dispatchers.
//!
//! ## Features
//!
//! | Area              | Description                                                            | Key types                                  |
//! |-------------------|------------------------------------------------------------------------|--------------------------------------------|
//! | **Lifecycle**     | Start/run/stop gate with single-winner transitions and safe admission.  | [`status::Controller`]                     |
//! | **Runners**       | Cancellation signal + in-flight barrier for background tasks.           | [`Runner`]                                 |
//! | **Buffers**       | Ordered channels with elastic overflow and drop policies.               | [`Buffer`], [`OverflowPolicy`]             |
//! | **Reactor**       | Strictly serialized handler execution with a priority band.             | [`Reactor`]                                |
//! | **Scheduling**    | Elastic worker pool, delays, external cancel, graceful drain.           | [`Scheduler`], [`Entity`], [`Executor`]    |
//! | **Cancellation**  | Cancel sources with attached errors; many-into-one aggregation.         | [`CancelSource`], [`MultiContext`]         |
//! | **Selection**     | Waiting on a dynamic, unbounded set of tagged signals.                  | [`Pool`], [`Selected`]                     |
//! | **Errors**        | Typed errors with stable labels.                                        | [`Error`]                                  |
//!
//! ```no_run
//! use std::time::Duration;
//! use conflux::{ExecutorFn, EntityOptions, Scheduler, SchedulerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), conflux::Error> {
//!     let scheduler = Scheduler::new(SchedulerOptions::default())?;
//!     scheduler.start();
//!
//!     let entity = scheduler.new_entity(
//!         ExecutorFn::new(|ctx| async move {
//!             tokio::select! {
//!                 _ = ctx.cancelled() => Err(conflux::Error::Canceled),
//!                 _ = tokio::time::sleep(Duration::from_millis(50)) => Ok(()),
//!             }
//!         }),
//!         EntityOptions::default(),
//!     );
//!     scheduler.push(&entity)?;
//!     entity.done().await;
//!     println!("{:?}", entity.result().status);
//!
//!     scheduler.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! Every instance owns its runners, buffers and registries; there is no
//! global state. Cancellation is cooperative throughout: stop operations
//! fire a signal, then wait for the affected tasks to finish on their own.
//!
//! ---

mod buffer;
mod chanpool;
mod context;
mod error;
mod mcontext;
mod reactor;
mod registry;
mod runner;
mod scheduler;

pub mod status;

// ---- Public re-exports ----

pub use buffer::{Buffer, BufferOptions, BufferReceiver, OverflowPolicy, SubmitResult};
pub use chanpool::{Pool, Selected};
pub use context::CancelSource;
pub use error::Error;
pub use mcontext::MultiContext;
pub use reactor::{Reactor, ReactorOptions};
pub use runner::Runner;
pub use scheduler::{
    Entity, EntityOptions, EntityResult, EntityStatus, Executor, ExecutorFn, Scheduler,
    SchedulerOptions,
};
