//! # Cancel sources: observable "done" signals with an attached error.
//!
//! [`CancelSource`] is a [`CancellationToken`] that can carry the reason it
//! fired and an optional deadline. It is the currency of external
//! cancellation in this crate: the scheduler's listener manager watches a
//! source and records the *source's* error on the entity it cancels, which a
//! bare token could not transport.
//!
//! ```rust
//! use conflux::{CancelSource, Error};
//!
//! let src = CancelSource::new();
//! src.cancel_with(Error::fail("upstream gone"));
//! assert!(src.is_cancelled());
//! assert_eq!(src.err(), Some(Error::fail("upstream gone")));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// An observable cancel signal with an optional attached error and deadline.
pub struct CancelSource {
    token: CancellationToken,
    fired: AtomicBool,
    err: Mutex<Option<Error>>,
    deadline: Option<Instant>,
}

impl CancelSource {
    /// Creates a source that fires only when cancelled explicitly.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            fired: AtomicBool::new(false),
            err: Mutex::new(None),
            deadline: None,
        })
    }

    /// Creates a source derived from `parent`: it fires when the parent fires
    /// or when cancelled explicitly.
    pub fn with_parent(parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            token: parent.child_token(),
            fired: AtomicBool::new(false),
            err: Mutex::new(None),
            deadline: None,
        })
    }

    /// Creates a source that cancels itself with [`Error::Canceled`] after
    /// `timeout`.
    pub fn with_timeout(timeout: Duration) -> Arc<Self> {
        let src = Arc::new(Self {
            token: CancellationToken::new(),
            fired: AtomicBool::new(false),
            err: Mutex::new(None),
            deadline: Some(Instant::now() + timeout),
        });
        let watch = src.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            watch.cancel();
        });
        src
    }

    /// Fires the signal with the default [`Error::Canceled`] reason.
    pub fn cancel(&self) {
        self.cancel_with(Error::Canceled);
    }

    /// Fires the signal, attaching `err` as the reason. Only the first call
    /// records a reason; later calls are no-ops.
    pub fn cancel_with(&self, err: Error) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.err.lock() = Some(err);
        self.token.cancel();
    }

    /// Waits for the signal to fire.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The underlying token, for embedding in `select!` arms or deriving
    /// children.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The recorded reason: the attached error once fired, else `None`.
    pub fn err(&self) -> Option<Error> {
        let slot = self.err.lock();
        if let Some(e) = slot.clone() {
            return Some(e);
        }
        if self.token.is_cancelled() {
            return Some(Error::Canceled);
        }
        None
    }

    /// The deadline, when this source was created with one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
