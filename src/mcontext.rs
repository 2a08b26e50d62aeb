//! # Aggregating many cancel sources into one.
//!
//! Listening to several cancel sources (how many is only known at runtime)
//! does not fit a literal `select!`. [`MultiContext`] watches any number of
//! [`CancelSource`]s with one background task and is itself observable as a
//! cancel source: its done signal fires as soon as any child fires (or the
//! aggregator is disposed), and the first-firing child is recorded as the
//! "hit".
//!
//! ```rust
//! # use conflux::{CancelSource, MultiContext};
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let a = CancelSource::new();
//! let b = CancelSource::new();
//! let mc = MultiContext::new(vec![a.clone(), b.clone()]);
//! mc.listen();
//!
//! b.cancel();
//! mc.cancelled().await;
//! assert!(std::sync::Arc::ptr_eq(&mc.hit().unwrap(), &b));
//! mc.dispose().await;
//! # }
//! ```
//!
//! [`MultiContext::listen`] is required before the aggregator observes
//! anything, and [`MultiContext::dispose`] shuts the background task down
//! deterministically.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures::future::select_all;

use crate::context::CancelSource;
use crate::error::Error;
use crate::runner::Runner;

/// Fans N child cancel sources into a single observable signal.
pub struct MultiContext {
    runner: Runner,
    source: Arc<CancelSource>,
    children: Vec<Arc<CancelSource>>,
    hit: Arc<OnceLock<Arc<CancelSource>>>,
}

impl MultiContext {
    pub fn new(children: Vec<Arc<CancelSource>>) -> Arc<Self> {
        Arc::new(Self {
            runner: Runner::new(),
            source: CancelSource::new(),
            children,
            hit: Arc::new(OnceLock::new()),
        })
    }

    /// Starts the watching task. Call once, paired with
    /// [`dispose`](Self::dispose).
    pub fn listen(&self) {
        self.runner.mark();
        let runner = self.runner.clone();
        let quit = runner.quit();
        let source = self.source.clone();
        let children = self.children.clone();
        let hit = self.hit.clone();
        tokio::spawn(async move {
            let waits = children
                .iter()
                .map(|c| {
                    let token = c.token().clone();
                    Box::pin(async move { token.cancelled_owned().await })
                })
                .collect::<Vec<_>>();
            if waits.is_empty() {
                quit.cancelled().await;
            } else {
                tokio::select! {
                    _ = quit.cancelled() => {}
                    (_, index, _) = select_all(waits) => {
                        let child = children[index].clone();
                        let err = child.err().unwrap_or(Error::Canceled);
                        let _ = hit.set(child);
                        source.cancel_with(err);
                    }
                }
            }
            // Disposal also completes the aggregate signal, like cancelling
            // a derived context.
            source.cancel();
            runner.done();
        });
    }

    /// Stops the watching task. The aggregate signal fires if it has not
    /// already.
    pub async fn dispose(&self) {
        self.runner.close_wait().await;
    }

    /// The first child that fired, if any did.
    pub fn hit(&self) -> Option<Arc<CancelSource>> {
        self.hit.get().cloned()
    }

    /// Waits for the aggregate signal.
    pub async fn cancelled(&self) {
        self.source.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }

    /// The aggregate viewed as a cancel source, e.g. for use as an entity's
    /// external context.
    pub fn as_source(&self) -> Arc<CancelSource> {
        self.source.clone()
    }

    /// The hit child's error when one fired, else the aggregate's own state.
    pub fn err(&self) -> Option<Error> {
        match self.hit.get() {
            Some(child) => child.err(),
            None => self.source.err(),
        }
    }

    /// The hit child's deadline when one fired, else the aggregate's own.
    pub fn deadline(&self) -> Option<Instant> {
        match self.hit.get() {
            Some(child) => child.deadline(),
            None => self.source.deadline(),
        }
    }
}
