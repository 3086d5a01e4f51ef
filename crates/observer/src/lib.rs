// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Connection observers and their runner.
//!
//! An observer is a stateful consumer of one moler connection with a
//! single-shot outcome: it watches the decoded stream for something
//! meaningful (a prompt, a failure line, a status transition) and finishes
//! exactly once with a value or an error. [`Command`](command::Command) and
//! [`Event`](event::Event) are the two observer shapes; both embed an
//! [`ObserverCore`] that owns the lifecycle, and a [`Runner`](runner::Runner)
//! pairs subscription with timeout accounting and the blocking
//! `await_done` contract.

pub mod command;
mod error;
pub mod event;
mod lines;
pub mod runner;
mod slot;

pub use error::ObserverError;
pub use lines::LineAssembler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use connection::{MolerConnection, StreamSubscriber};
use tracing::debug;

use slot::ResultSlot;

/// Final outcome of an observer: a structured value or the recorded failure.
pub type ObserverResult = Result<serde_json::Value, ObserverError>;

/// Anything the runner can schedule: a stream subscriber with an
/// [`ObserverCore`] and an optional start action (commands send their
/// command line here).
pub trait Observer: StreamSubscriber {
    fn core(&self) -> &ObserverCore;

    /// Invoked by the runner after the observer is subscribed and its
    /// timeout armed. An error here finishes the observer immediately.
    fn on_start(&self) -> Result<(), ObserverError> {
        Ok(())
    }
}

/// Shared lifecycle state embedded in every observer.
///
/// Owns the result slot, the started flag and the connection subscription.
/// All terminal paths (value, failure, timeout, cancel) converge in
/// [`ObserverCore::set_result`] / [`ObserverCore::set_exception`], which
/// unsubscribe the observer before waking `await_done` callers.
pub struct ObserverCore {
    name: String,
    connection: Arc<MolerConnection>,
    slot: ResultSlot,
    started: AtomicBool,
    subscription: Mutex<Option<u64>>,
    timeout: Mutex<Duration>,
}

impl ObserverCore {
    pub fn new(
        name: impl Into<String>,
        connection: Arc<MolerConnection>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            connection,
            slot: ResultSlot::new(),
            started: AtomicBool::new(false),
            subscription: Mutex::new(None),
            timeout: Mutex::new(timeout),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Arc<MolerConnection> {
        &self.connection
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
            .lock()
            .map(|t| *t)
            .unwrap_or(Duration::from_secs(30))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        if let Ok(mut t) = self.timeout.lock() {
            *t = timeout;
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// True once the outcome is decided; inbound data is ignored from then
    /// on.
    pub fn is_done(&self) -> bool {
        self.slot.is_set()
    }

    /// The outcome, once the observer has fully finished.
    pub fn outcome(&self) -> Option<ObserverResult> {
        self.slot.peek()
    }

    /// Install the successful result. First terminal call wins; the rest
    /// are no-ops.
    pub fn set_result(&self, value: serde_json::Value) -> bool {
        self.finish(Ok(value))
    }

    /// Install a failure. First terminal call wins; the rest are no-ops.
    pub fn set_exception(&self, error: ObserverError) -> bool {
        self.finish(Err(error))
    }

    /// Signal abandonment; the observer finishes with a cancellation error.
    /// Cancelling before `start` makes a later `start` fail synchronously.
    pub fn cancel(&self) -> bool {
        self.finish(Err(ObserverError::Cancelled(self.name.clone())))
    }

    fn finish(&self, outcome: ObserverResult) -> bool {
        if !self.slot.set(outcome) {
            return false;
        }
        if let Ok(mut subscription) = self.subscription.lock() {
            if let Some(id) = subscription.take() {
                self.connection.unsubscribe(id);
            }
        }
        self.slot.release();
        debug!("observer '{}' reached terminal state", self.name);
        true
    }

    /// Block until terminal; returns the recorded outcome. Repeated calls
    /// return the same outcome.
    pub async fn await_done(&self) -> ObserverResult {
        if !self.is_started() && !self.is_done() {
            return Err(ObserverError::WrongUsage(format!(
                "observer '{}' awaited before being started",
                self.name
            )));
        }
        self.slot.wait().await
    }

    pub(crate) fn mark_started(&self) -> Result<(), ObserverError> {
        if self.is_done() {
            return Err(ObserverError::WrongUsage(format!(
                "observer '{}' already finished or was cancelled; it cannot be started",
                self.name
            )));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ObserverError::WrongUsage(format!(
                "observer '{}' already started",
                self.name
            )));
        }
        Ok(())
    }

    pub(crate) fn set_subscription(&self, id: u64) {
        if let Ok(mut subscription) = self.subscription.lock() {
            *subscription = Some(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn core() -> ObserverCore {
        ObserverCore::new(
            "test",
            MolerConnection::new("core-test"),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn terminal_transition_happens_at_most_once() {
        let c = core();
        assert!(c.set_result(json!(1)));
        assert!(!c.set_result(json!(2)));
        assert!(!c.set_exception(ObserverError::Cancelled("test".into())));
        assert_eq!(c.outcome().unwrap().unwrap(), json!(1));
    }

    #[test]
    fn cancel_before_start_blocks_start() {
        let c = core();
        assert!(c.cancel());
        assert!(matches!(
            c.mark_started(),
            Err(ObserverError::WrongUsage(_))
        ));
    }

    #[tokio::test]
    async fn await_before_start_is_wrong_usage() {
        let c = core();
        assert!(matches!(
            c.await_done().await,
            Err(ObserverError::WrongUsage(_))
        ));
    }

    #[tokio::test]
    async fn await_done_repeats_the_same_outcome() {
        let c = core();
        c.mark_started().unwrap();
        c.set_result(json!("done"));
        assert_eq!(c.await_done().await.unwrap(), json!("done"));
        assert_eq!(c.await_done().await.unwrap(), json!("done"));
    }
}
