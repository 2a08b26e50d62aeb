//! # Background-task lifetime control.
//!
//! [`Runner`] pairs a cancellation signal with an in-flight counter, so an
//! owner can stop its background tasks and *know* they have finished:
//!
//! ```text
//! runner.mark();
//! let r = runner.clone();
//! tokio::spawn(async move {
//!     loop {
//!         tokio::select! {
//!             _ = r.quit().cancelled() => break,
//!             ... = work() => { ... }
//!         }
//!     }
//!     r.done();
//! });
//! ...
//! runner.close_wait().await;   // cancel, then join
//! ```
//!
//! After [`Runner::close_wait`] returns, no task marked through this runner is
//! still executing. All methods are thread safe and the handle is cheap to
//! clone.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Cancellation signal plus in-flight counter for background tasks.
#[derive(Clone)]
pub struct Runner {
    token: CancellationToken,
    count: watch::Sender<usize>,
}

impl Runner {
    /// Creates a standalone runner.
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            token: CancellationToken::new(),
            count,
        }
    }

    /// Creates a runner whose quit signal also fires when `parent` fires.
    ///
    /// [`close_wait`](Self::close_wait) still cancels only the local signal.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            token: parent.child_token(),
            count,
        }
    }

    /// Returns the quit signal observed by background tasks.
    pub fn quit(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the quit signal has fired.
    pub fn is_quit(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Registers one in-flight task.
    pub fn mark(&self) {
        self.count.send_modify(|n| *n += 1);
    }

    /// Announces completion of a task registered with [`mark`](Self::mark).
    pub fn done(&self) {
        self.count.send_modify(|n| {
            debug_assert!(*n > 0, "done called more times than mark");
            *n = n.saturating_sub(1);
        });
    }

    /// Waits until the in-flight count reaches zero, without cancelling.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // The closure sees the current value first, so a zero count returns
        // immediately.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Fires the quit signal, then waits for all in-flight tasks to finish.
    pub async fn close_wait(&self) {
        self.token.cancel();
        self.wait().await;
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}
