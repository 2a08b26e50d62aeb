//! # Lifecycle status gate for services and workers.
//!
//! [`Controller`] guards the start/run/stop lifecycle of an object that owns
//! background work. A service has the usual states: ready, starting, running,
//! stopping, stopped. While it is not running it must not accept requests, and
//! two callers must never start (or stop) it at the same time; the transient
//! `Starting`/`Stopping` states exist to hand exactly one caller the win.
//!
//! The typical embedding:
//!
//! ```text
//! fn start(&self) {
//!     if !self.status.begin_start() { return; }   // someone else won, or wrong state
//!     ... spawn background work ...
//!     self.status.end_start();                    // or fail_start(err)
//! }
//!
//! async fn stop(&self) {
//!     if !self.status.begin_stop().await { return; }
//!     ... shut background work down ...
//!     self.status.end_stop();
//! }
//!
//! fn request(&self) -> Result<(), Error> {
//!     if !self.status.admit() { return Err(...); }
//!     ... serve ...
//!     self.status.release();
//!     Ok(())
//! }
//! ```
//!
//! `begin_stop` raises a down flag *before* checking state, then waits until
//! every admitted request has released. A request that observed `admit() ==
//! true` therefore always completes before the stop transition proceeds, and
//! any request arriving after the flag is raised fails fast.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Lifecycle states tracked by [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created, never started.
    Ready,
    /// One caller is performing the start transition.
    Starting,
    /// Accepting requests.
    Running,
    /// One caller is performing the stop transition.
    Stopping,
    /// Stopped (terminal), possibly after a failed start.
    Stopped,
}

/// Finite-state gate over lifecycle transitions and request admission.
///
/// All methods are thread safe. The paired calls (`begin_start`/`end_start`,
/// `begin_stop`/`end_stop`, `admit`/`release`) must be balanced by the caller;
/// forgetting the closing call of a pair that returned `true` wedges the gate.
pub struct Controller {
    state: Mutex<State>,
    down: AtomicBool,
    admissions: AtomicUsize,
    drained: Notify,
    err: Mutex<Option<Error>>,
}

impl Controller {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Ready),
            down: AtomicBool::new(false),
            admissions: AtomicUsize::new(0),
            drained: Notify::new(),
            err: Mutex::new(None),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> State {
        *self.state.lock()
    }

    /// Claims the start transition.
    ///
    /// Returns `true` only when the state was `Ready`; the caller then owns
    /// the transition and must finish it with [`end_start`](Self::end_start)
    /// or [`fail_start`](Self::fail_start). Every other concurrent caller
    /// gets `false`.
    pub fn begin_start(&self) -> bool {
        let mut state = self.state.lock();
        if *state != State::Ready {
            return false;
        }
        *state = State::Starting;
        true
    }

    /// Completes a start transition claimed by [`begin_start`](Self::begin_start).
    pub fn end_start(&self) {
        let mut state = self.state.lock();
        match *state {
            State::Ready | State::Starting => *state = State::Running,
            _ => panic!("end_start called while not starting"),
        }
    }

    /// Aborts a start transition, recording `err` for later retrieval.
    ///
    /// Legal from `Ready` or `Starting`; the gate lands in `Stopped`.
    pub fn fail_start(&self, err: Error) {
        let mut state = self.state.lock();
        match *state {
            State::Ready | State::Starting => *state = State::Stopped,
            _ => panic!("fail_start called while not starting"),
        }
        *self.err.lock() = Some(err);
    }

    /// Claims the stop transition.
    ///
    /// Raises the down flag first (new admissions fail from this point on),
    /// then returns `true` only when the state was `Running`. On success the
    /// call waits for every admitted request to release before returning, so
    /// the caller may tear down shared resources immediately afterwards.
    /// The down flag stays raised even when `false` is returned.
    pub async fn begin_stop(&self) -> bool {
        self.down.store(true, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            if *state != State::Running {
                return false;
            }
            *state = State::Stopping;
        }
        // Admissions observed the down flag or were counted before it; wait
        // for the counted ones to drain. The waiter must be registered before
        // the counter is checked or a release in between is lost.
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.admissions.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
        true
    }

    /// Completes a stop transition claimed by [`begin_stop`](Self::begin_stop).
    pub fn end_stop(&self) {
        let mut state = self.state.lock();
        if *state != State::Stopping {
            panic!("end_stop called while not stopping");
        }
        *state = State::Stopped;
    }

    /// Admits one request while running.
    ///
    /// Returns `true` iff the down flag is not raised and the state is
    /// `Running`; the admission is counted until [`release`](Self::release).
    pub fn admit(&self) -> bool {
        if self.down.load(Ordering::SeqCst) {
            return false;
        }
        self.admissions.fetch_add(1, Ordering::SeqCst);
        let ok = !self.down.load(Ordering::SeqCst) && *self.state.lock() == State::Running;
        if !ok {
            self.release();
        }
        ok
    }

    /// Like [`admit`](Self::admit), but while the state is still `Ready` the
    /// call yields and retries until the gate starts running, `cancel` fires,
    /// or the state moves downward.
    pub async fn admit_with_wait(&self, cancel: &CancellationToken) -> bool {
        if self.down.load(Ordering::SeqCst) {
            return false;
        }
        loop {
            match self.state() {
                State::Running => {
                    if self.admit() {
                        return true;
                    }
                    // Lost a race with stop.
                    return false;
                }
                State::Ready => {
                    if cancel.is_cancelled() {
                        return false;
                    }
                    tokio::task::yield_now().await;
                }
                _ => return false,
            }
        }
    }

    /// Releases an admission previously granted by a successful
    /// [`admit`](Self::admit) or [`admit_with_wait`](Self::admit_with_wait).
    pub fn release(&self) {
        let prev = self.admissions.fetch_sub(1, Ordering::SeqCst);
        assert!(prev != 0, "release called without a matching admit");
        if prev == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Returns the error recorded by [`fail_start`](Self::fail_start), or the
    /// caller's fallback when none was recorded.
    pub fn status_error(&self, fallback: Error) -> Error {
        self.err.lock().clone().unwrap_or(fallback)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}
