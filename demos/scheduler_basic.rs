//! # Example: scheduler_basic
//!
//! Demonstrates the scheduler's per-task controls:
//! - immediate and delayed dispatch
//! - cancelling a running entity
//! - an external cancel source firing without touching the scheduler
//! - graceful stop with every entity reaching a terminal state
//!
//! ## Run
//! ```bash
//! cargo run --example scheduler_basic
//! ```

use std::time::Duration;

use conflux::{CancelSource, EntityOptions, Error, ExecutorFn, Scheduler, SchedulerOptions};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    println!("=== scheduler_basic example ===\n");

    let scheduler = Scheduler::new(SchedulerOptions {
        pool_size: 4,
        ..SchedulerOptions::default()
    })?;
    scheduler.start();

    // 1. A short task that completes normally.
    let quick = scheduler.new_entity(
        ExecutorFn::new(|_ctx| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            println!("[quick] finished");
            Ok(())
        }),
        EntityOptions::default(),
    );
    scheduler.push(&quick)?;

    // 2. A delayed task: not eligible before its delay elapses.
    let delayed = scheduler.new_entity(
        ExecutorFn::new(|_ctx| async move {
            println!("[delayed] running after its delay");
            Ok(())
        }),
        EntityOptions {
            delay: Duration::from_millis(200),
            ..EntityOptions::default()
        },
    );
    scheduler.push(&delayed)?;

    // 3. A long task cancelled mid-flight by an external source.
    let external = CancelSource::new();
    let watched = scheduler.new_entity(
        ExecutorFn::new(|ctx| async move {
            ctx.cancelled().await;
            println!("[watched] observed cancellation, winding down");
            Ok(())
        }),
        EntityOptions {
            external: Some(external.clone()),
            ..EntityOptions::default()
        },
    );
    scheduler.push(&watched)?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    external.cancel_with(Error::fail("upstream gave up"));

    quick.done().await;
    delayed.done().await;
    watched.done().await;

    for (name, entity) in [("quick", &quick), ("delayed", &delayed), ("watched", &watched)] {
        let result = entity.result();
        println!(
            "[{name}] status={:?} err={:?} waited={:?} ran={:?}",
            result.status, result.err, result.waiting, result.executing
        );
    }

    scheduler.stop().await;
    println!("\n=== example completed successfully ===");
    Ok(())
}
