//! # Error types used across the crate.
//!
//! A single [`Error`] enum covers every failure the library reports:
//!
//! - [`Error::InvalidStatus`]: a request was made in an illegal lifecycle state.
//! - [`Error::HandlerCanceled`]: a queued reactor handler was canceled at shutdown.
//! - [`Error::Canceled`]: cooperative cancellation (the async analogue of a
//!   canceled context).
//! - [`Error::Config`]: invalid construction-time configuration, raised eagerly.
//! - [`Error::Fail`]: a user executor returned an error; recorded on the
//!   entity result, never raised by the library itself.
//!
//! Errors are `Clone + PartialEq` so result snapshots can be compared, and each
//! variant has a short stable label via [`Error::as_label`] for logs/metrics.

use thiserror::Error;

/// Errors produced by the concurrency primitives.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The operation is not allowed in the current lifecycle state
    /// (e.g. `push` after `stop`, `post` before `start`).
    #[error("invalid status: '{op}' not allowed in the current state")]
    InvalidStatus {
        /// The rejected operation.
        op: &'static str,
    },

    /// A handler was queued but never ran because the reactor stopped.
    ///
    /// This is the completion recorded on every task still waiting when
    /// shutdown drains the queues.
    #[error("handler canceled: reactor stopped before the handler could run")]
    HandlerCanceled,

    /// Cooperative cancellation.
    ///
    /// Not an error in the traditional sense; signals intentional termination.
    #[error("context canceled")]
    Canceled,

    /// Invalid configuration detected at construction time.
    #[error("invalid configuration: {reason}")]
    Config {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// An executor returned a failure; stored on the entity result.
    #[error("execution failed: {reason}")]
    Fail {
        /// The executor's reported reason.
        reason: String,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidStatus`].
    pub(crate) fn invalid_status(op: &'static str) -> Self {
        Error::InvalidStatus { op }
    }

    /// Builds an [`Error::Fail`] from any displayable reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Error::Fail {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::InvalidStatus { .. } => "invalid_status",
            Error::HandlerCanceled => "handler_canceled",
            Error::Canceled => "canceled",
            Error::Config { .. } => "config",
            Error::Fail { .. } => "fail",
        }
    }

    /// Indicates whether the error represents intentional cancellation
    /// rather than a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled | Error::HandlerCanceled)
    }
}
