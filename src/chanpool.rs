//! # Selector pool: waiting on an arbitrary, dynamic set of signals.
//!
//! Selecting over a handful of known signals is what `tokio::select!` is for.
//! When the set is dynamic (hundreds of thousands of per-item timers or
//! cancel sources, changing every round) the select must be data-driven.
//! [`Pool`] fills that gap: register any number of tagged signals, then call
//! [`Pool::select_one`] to wait for the first of quit, refresh, or any
//! registered signal.
//!
//! Registered signals partition into fixed-size groups; each group owns a
//! dedicated [`Reactor`](crate::Reactor) that is reused across rounds. A
//! round posts one select job per non-empty group; the jobs race to publish
//! their winning tag into a per-round, capacity-1 winner channel, and the
//! round's done token terminates the losers. At most one winner is ever
//! observed, and the fan-in scales far beyond what a single `select_all`
//! round-robin over a flat list would make pleasant to manage.
//!
//! The typical driving loop, used by the scheduler's delay and listener
//! managers:
//!
//! ```text
//! let mut pool = Pool::new(quit, refresh);
//! loop {
//!     pool.reset();
//!     for item in snapshot() {
//!         pool.add(item.id, item.signal());
//!     }
//!     match pool.select_one().await {
//!         Selected::Quit => break,
//!         Selected::Refresh => continue,      // re-snapshot and re-arm
//!         Selected::Key(id) => handle(id),
//!     }
//! }
//! pool.dispose().await;
//! ```
//!
//! Methods are not thread safe; the pool belongs to one driving task.

use std::sync::Arc;

use futures::future::{select_all, BoxFuture};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::reactor::{Reactor, ReactorOptions};

/// Signals per group; one reactor serves each group.
const GROUP_CAPACITY: usize = 65_536;

/// Why [`Pool::select_one`] returned.
#[derive(Debug, PartialEq, Eq)]
pub enum Selected<T> {
    /// The shared quit signal fired.
    Quit,
    /// The refresh signal fired; the caller should rebuild the set.
    Refresh,
    /// A registered signal fired; carries its tag.
    Key(T),
}

struct Group<T> {
    reactor: Arc<Reactor>,
    tags: Vec<T>,
    signals: Vec<BoxFuture<'static, ()>>,
}

impl<T> Group<T> {
    fn new() -> Self {
        let reactor = Reactor::new(ReactorOptions::default());
        reactor.start();
        Self {
            reactor,
            tags: Vec::new(),
            signals: Vec::new(),
        }
    }
}

/// Select over a dynamic collection of tagged "done" signals.
pub struct Pool<T> {
    quit: CancellationToken,
    refresh: Arc<Notify>,
    groups: Vec<Group<T>>,
    active: usize,
}

impl<T: Send + 'static> Pool<T> {
    /// Creates a pool. `quit` ends every future [`select_one`](Self::select_one)
    /// with [`Selected::Quit`]; `refresh` interrupts the current one with
    /// [`Selected::Refresh`] so the caller can re-register.
    pub fn new(quit: CancellationToken, refresh: Arc<Notify>) -> Self {
        Self {
            quit,
            refresh,
            groups: Vec::new(),
            active: 0,
        }
    }

    /// Clears the registered signals. Group reactors are kept for reuse.
    pub fn reset(&mut self) {
        for group in &mut self.groups {
            group.tags.clear();
            group.signals.clear();
        }
        self.active = 0;
    }

    /// Registers a signal; `tag` is returned by
    /// [`select_one`](Self::select_one) if this signal fires first.
    pub fn add(&mut self, tag: T, signal: BoxFuture<'static, ()>) {
        if self.active == self.groups.len() {
            self.groups.push(Group::new());
        }
        if self.groups[self.active].tags.len() == GROUP_CAPACITY {
            self.active += 1;
            if self.active == self.groups.len() {
                self.groups.push(Group::new());
            }
        }
        let group = &mut self.groups[self.active];
        group.tags.push(tag);
        group.signals.push(signal);
    }

    /// Blocks until quit, refresh, or one registered signal fires.
    ///
    /// Consumes the registered set: callers re-register each round (usually
    /// from a fresh snapshot).
    pub async fn select_one(&mut self) -> Selected<T> {
        let round = CancellationToken::new();
        let (winner_tx, mut winner_rx) = mpsc::channel::<T>(1);

        for group in &mut self.groups {
            if group.tags.is_empty() {
                continue;
            }
            let mut tags = std::mem::take(&mut group.tags);
            let signals = std::mem::take(&mut group.signals);
            let round = round.clone();
            let winner_tx = winner_tx.clone();
            let posted = group.reactor.post(move |_ctx| async move {
                tokio::select! {
                    _ = round.cancelled() => {}
                    (_, index, _) = select_all(signals) => {
                        // First writer wins; losers find the slot taken or
                        // the round closed.
                        let _ = winner_tx.try_send(tags.swap_remove(index));
                    }
                }
            });
            if let Err(err) = posted {
                tracing::warn!(error = %err, "selector group rejected its select job");
            }
        }
        self.active = 0;

        let outcome = tokio::select! {
            biased;
            _ = self.quit.cancelled() => Selected::Quit,
            _ = self.refresh.notified() => Selected::Refresh,
            tag = winner_rx.recv() => match tag {
                Some(tag) => Selected::Key(tag),
                None => Selected::Quit,
            },
        };
        // Terminate the losing group selects; each group's reactor frees up
        // for the next round.
        round.cancel();
        outcome
    }

    /// Stops the group reactors. Call when the pool is no longer used, or
    /// their consumer tasks will linger.
    pub async fn dispose(&mut self) {
        let reactors: Vec<_> = self.groups.iter().map(|group| group.reactor.clone()).collect();
        for reactor in reactors {
            reactor.stop().await;
        }
        self.groups.clear();
    }
}
