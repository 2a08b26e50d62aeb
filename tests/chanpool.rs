//! Selector pool: quit/refresh outcomes and tag fidelity at scale.

use std::sync::Arc;

use conflux::{Pool, Selected};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

fn signal_of(token: &CancellationToken) -> futures::future::BoxFuture<'static, ()> {
    Box::pin(token.clone().cancelled_owned())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quit_wins_over_registered_signals() {
    let quit = CancellationToken::new();
    let refresh = Arc::new(Notify::new());
    let mut pool: Pool<usize> = Pool::new(quit.clone(), refresh);

    pool.reset();
    let signals: Vec<CancellationToken> =
        (0..100).map(|_| CancellationToken::new()).collect();
    for (i, token) in signals.iter().enumerate() {
        pool.add(i, signal_of(token));
    }

    let trigger = tokio::spawn(async move {
        quit.cancel();
    });
    assert_eq!(pool.select_one().await, Selected::Quit);
    trigger.await.unwrap();

    pool.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_interrupts_the_round() {
    let quit = CancellationToken::new();
    let refresh = Arc::new(Notify::new());
    let mut pool: Pool<usize> = Pool::new(quit, refresh.clone());

    pool.reset();
    let signals: Vec<CancellationToken> =
        (0..100).map(|_| CancellationToken::new()).collect();
    for (i, token) in signals.iter().enumerate() {
        pool.add(i, signal_of(token));
    }

    let trigger = tokio::spawn(async move {
        refresh.notify_one();
    });
    assert_eq!(pool.select_one().await, Selected::Refresh);
    trigger.await.unwrap();

    pool.dispose().await;
}

// Registers more signals than one group holds, across several rounds, and
// checks the returned tag is the signal that actually fired.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn big_pool_returns_the_fired_tag() {
    const ROUNDS: usize = 3;
    const SIGNALS: usize = 70_000;

    let quit = CancellationToken::new();
    let refresh = Arc::new(Notify::new());
    let mut pool: Pool<usize> = Pool::new(quit.clone(), refresh);

    for round in 0..ROUNDS {
        pool.reset();
        let signals: Vec<CancellationToken> =
            (0..SIGNALS).map(|_| CancellationToken::new()).collect();
        for (i, token) in signals.iter().enumerate() {
            pool.add(i, signal_of(token));
        }

        let chosen = (round * 31 + 17) * SIGNALS / (ROUNDS * 31 + 17);
        signals[chosen].cancel();

        match pool.select_one().await {
            Selected::Key(tag) => assert_eq!(tag, chosen, "round {round}"),
            other => panic!("round {round}: unexpected outcome {other:?}"),
        }
    }

    pool.dispose().await;
}
