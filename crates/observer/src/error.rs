// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::time::Duration;

use connection::ConnectionError;
use thiserror::Error;

/// Failure kinds an observer can finish with.
///
/// Clone-able on purpose: the recorded outcome is handed to every
/// `await_done` caller.
#[derive(Debug, Clone, Error)]
pub enum ObserverError {
    /// The parser recognised a failure indication in the output.
    #[error("command failed: {0}")]
    CommandFailure(String),

    /// The armed deadline expired before the observer finished.
    #[error("observer '{name}' timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    /// External `cancel()`.
    #[error("observer '{0}' was cancelled")]
    Cancelled(String),

    /// Lifecycle misuse: double start, start after cancel, await before
    /// start.
    #[error("wrong usage: {0}")]
    WrongUsage(String),

    /// The underlying connection failed while the observer was running.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Bad observer configuration detected before any io happened.
    #[error("configuration error: {0}")]
    Config(String),
}
