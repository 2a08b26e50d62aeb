//! Scheduler end-to-end behavior: pool elasticity, cancellation, delays,
//! external contexts and graceful shutdown.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conflux::{
    CancelSource, EntityOptions, EntityStatus, Error, ExecutorFn, Scheduler, SchedulerOptions,
};
use rand::Rng;

fn scheduler_with_pool(pool_size: usize) -> Scheduler {
    let scheduler = Scheduler::new(SchedulerOptions {
        pool_size,
        ..SchedulerOptions::default()
    })
    .unwrap();
    scheduler.start();
    scheduler
}

#[derive(Default)]
struct Statistics {
    done: AtomicU32,
    aborted: AtomicU32,
    canceled: AtomicU32,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_storm_keeps_the_books_balanced() {
    const COUNT: usize = 500;

    let scheduler = scheduler_with_pool(10);
    let stats = Arc::new(Statistics::default());

    let mut entities = Vec::with_capacity(COUNT);
    for _ in 0..COUNT {
        let stats = stats.clone();
        let stats_abandon = stats.clone();
        let entity = scheduler.new_entity(
            ExecutorFn::with_abandon(
                move |ctx| {
                    let stats = stats.clone();
                    async move {
                        tokio::select! {
                            _ = ctx.cancelled() => {
                                stats.aborted.fetch_add(1, Ordering::SeqCst);
                                Err(Error::fail("interrupted"))
                            }
                            _ = tokio::time::sleep(Duration::from_millis(10)) => {
                                stats.done.fetch_add(1, Ordering::SeqCst);
                                Ok(())
                            }
                        }
                    }
                },
                move || {
                    stats_abandon.canceled.fetch_add(1, Ordering::SeqCst);
                },
            ),
            EntityOptions::default(),
        );
        scheduler.push(&entity).unwrap();
        entities.push(entity);
    }

    // Cancel random entities while the pool churns, then stop.
    for _ in 0..50 {
        let n = rand::thread_rng().gen_range(0..COUNT);
        entities[n].cancel();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    scheduler.stop().await;

    let mut expect_done = 0u32;
    let mut expect_aborted = 0u32;
    let mut expect_canceled = 0u32;
    for entity in &entities {
        assert!(entity.is_done());
        let result = entity.result();
        match result.status {
            EntityStatus::Done => expect_done += 1,
            EntityStatus::Aborted => {
                // The executor's own verdict tells whether it observed the
                // cancel or merely lost the race after finishing.
                if result.err == Some(Error::fail("interrupted")) {
                    expect_aborted += 1;
                } else {
                    expect_done += 1;
                }
            }
            EntityStatus::Canceled => expect_canceled += 1,
            other => panic!("non-terminal status after stop: {other:?}"),
        }
    }
    assert_eq!(stats.done.load(Ordering::SeqCst), expect_done);
    assert_eq!(stats.aborted.load(Ordering::SeqCst), expect_aborted);
    assert_eq!(stats.canceled.load(Ordering::SeqCst), expect_canceled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn graceful_stop_reaches_every_entity() {
    const COUNT: usize = 1_000;

    let scheduler = scheduler_with_pool(1);
    let ran = Arc::new(AtomicU32::new(0));
    let abandoned = Arc::new(AtomicU32::new(0));

    let mut entities = Vec::with_capacity(COUNT);
    for _ in 0..COUNT {
        let ran = ran.clone();
        let abandoned = abandoned.clone();
        let entity = scheduler.new_entity(
            ExecutorFn::with_abandon(
                move |ctx| {
                    let ran = ran.clone();
                    async move {
                        // Block until the scheduler asks us to wind down.
                        ctx.cancelled().await;
                        ran.fetch_add(1, Ordering::SeqCst);
                        Err(Error::Canceled)
                    }
                },
                move || {
                    abandoned.fetch_add(1, Ordering::SeqCst);
                },
            ),
            EntityOptions::default(),
        );
        scheduler.push(&entity).unwrap();
        entities.push(entity);
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.stop().await;

    // Exactly one of execute/abandon happened for each entity.
    assert_eq!(
        ran.load(Ordering::SeqCst) + abandoned.load(Ordering::SeqCst),
        COUNT as u32
    );
    for entity in &entities {
        assert!(entity.result().status.is_terminal());
    }

    // stop() is idempotent, and push is refused afterwards.
    scheduler.stop().await;
    let late = scheduler.new_entity(
        ExecutorFn::new(|_ctx| async { Ok(()) }),
        EntityOptions::default(),
    );
    assert_eq!(
        scheduler.push(&late),
        Err(Error::InvalidStatus { op: "push" })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_worker_pool_runs_serially() {
    const COUNT: u32 = 50;
    const WORK: Duration = Duration::from_millis(5);

    let scheduler = scheduler_with_pool(1);

    let mut entities = Vec::new();
    for _ in 0..COUNT {
        let entity = scheduler.new_entity(
            ExecutorFn::new(move |_ctx| async move {
                tokio::time::sleep(WORK).await;
                Ok(())
            }),
            EntityOptions::default(),
        );
        scheduler.push(&entity).unwrap();
        entities.push(entity);
    }

    let begun = Instant::now();
    for entity in &entities {
        entity.done().await;
    }
    let elapsed = begun.elapsed();
    assert!(
        elapsed >= WORK * COUNT - Duration::from_millis(50),
        "a single worker must serialize: {elapsed:?}"
    );

    scheduler.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delayed_entity_waits_its_delay() {
    let scheduler = scheduler_with_pool(2);
    let delay = Duration::from_millis(200);

    let ran_at: Arc<parking_lot::Mutex<Option<Instant>>> =
        Arc::new(parking_lot::Mutex::new(None));
    let entity = {
        let ran_at = ran_at.clone();
        scheduler.new_entity(
            ExecutorFn::new(move |_ctx| {
                let ran_at = ran_at.clone();
                async move {
                    *ran_at.lock() = Some(Instant::now());
                    Ok(())
                }
            }),
            EntityOptions {
                delay,
                ..EntityOptions::default()
            },
        )
    };

    let pushed_at = Instant::now();
    entity.dispatch().unwrap();
    entity.done().await;

    let ran_at = ran_at.lock().expect("executor must have run");
    assert!(
        ran_at - pushed_at >= delay,
        "dispatched after {:?}, expected at least {delay:?}",
        ran_at - pushed_at
    );
    assert_eq!(entity.result().status, EntityStatus::Done);

    scheduler.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_cancels_entities_still_delayed() {
    let scheduler = scheduler_with_pool(2);
    let abandoned = Arc::new(AtomicU32::new(0));

    let entity = {
        let abandoned = abandoned.clone();
        scheduler.new_entity(
            ExecutorFn::with_abandon(
                |_ctx| async { Ok(()) },
                move || {
                    abandoned.fetch_add(1, Ordering::SeqCst);
                },
            ),
            EntityOptions {
                delay: Duration::from_secs(3600),
                ..EntityOptions::default()
            },
        )
    };
    scheduler.push(&entity).unwrap();

    scheduler.stop().await;
    assert!(entity.is_done());
    assert_eq!(entity.result().status, EntityStatus::Canceled);
    assert_eq!(abandoned.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn external_source_cancels_without_stopping_the_scheduler() {
    let scheduler = scheduler_with_pool(2);
    let external = CancelSource::new();

    let entity = scheduler.new_entity(
        ExecutorFn::new(|ctx| async move {
            ctx.cancelled().await;
            Ok(())
        }),
        EntityOptions {
            external: Some(external.clone()),
            ..EntityOptions::default()
        },
    );
    scheduler.push(&entity).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    external.cancel_with(Error::fail("deadline from upstream"));
    entity.done().await;

    let result = entity.result();
    assert_eq!(result.status, EntityStatus::Aborted);
    assert_eq!(result.err, Some(Error::fail("deadline from upstream")));

    // The scheduler is untouched: a fresh entity still runs.
    let follow_up = scheduler.new_entity(
        ExecutorFn::new(|_ctx| async { Ok(()) }),
        EntityOptions::default(),
    );
    scheduler.push(&follow_up).unwrap();
    follow_up.done().await;
    assert_eq!(follow_up.result().status, EntityStatus::Done);

    scheduler.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_is_idempotent() {
    let scheduler = scheduler_with_pool(2);

    let entity = scheduler.new_entity(
        ExecutorFn::new(|ctx| async move {
            ctx.cancelled().await;
            Ok(())
        }),
        EntityOptions::default(),
    );
    scheduler.push(&entity).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    entity.cancel();
    entity.done().await;
    let first = entity.result();

    entity.cancel();
    entity.cancel_with(Error::fail("should not replace the recorded outcome"));
    let second = entity.result();
    assert_eq!(first.status, second.status);
    assert_eq!(first.err, second.err);

    scheduler.stop().await;
}

#[tokio::test]
async fn zero_pool_size_is_a_config_error() {
    let err = match Scheduler::new(SchedulerOptions {
        pool_size: 0,
        ..SchedulerOptions::default()
    }) {
        Err(err) => err,
        Ok(_) => panic!("a zero pool size must be rejected"),
    };
    assert_eq!(err.as_label(), "config");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiting_and_executing_times_are_captured() {
    let scheduler = scheduler_with_pool(1);

    let entity = scheduler.new_entity(
        ExecutorFn::new(|_ctx| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(())
        }),
        EntityOptions::default(),
    );
    scheduler.push(&entity).unwrap();
    entity.done().await;

    let result = entity.result();
    assert_eq!(result.status, EntityStatus::Done);
    assert!(result.executing >= Duration::from_millis(30));

    scheduler.stop().await;
}
