// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::sync::Mutex;

use tokio::sync::watch;
use tracing::warn;

use crate::ObserverResult;

struct Inner {
    outcome: Option<ObserverResult>,
    released: bool,
}

/// Single-shot outcome cell with an explicit release step.
///
/// `set` records the first outcome and rejects every later one. Waiters are
/// only woken by `release`, which the owner calls after unsubscribing the
/// observer from its connection, so a foreground caller never resumes while
/// the observer is still in a subscriber set.
pub(crate) struct ResultSlot {
    inner: Mutex<Inner>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl ResultSlot {
    pub(crate) fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                outcome: None,
                released: false,
            }),
            done_tx,
            done_rx,
        }
    }

    /// Record the outcome; the first call wins, later calls are no-ops.
    pub(crate) fn set(&self, outcome: ObserverResult) -> bool {
        match self.inner.lock() {
            Ok(mut inner) => {
                if inner.outcome.is_some() {
                    return false;
                }
                inner.outcome = Some(outcome);
                true
            }
            Err(_) => {
                warn!("result slot lock poisoned on set");
                false
            }
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.outcome.is_some())
            .unwrap_or(false)
    }

    /// Make the recorded outcome visible to waiters and wake them.
    pub(crate) fn release(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.released = true;
        }
        let _ = self.done_tx.send(true);
    }

    /// The outcome, once released.
    pub(crate) fn peek(&self) -> Option<ObserverResult> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| {
                if inner.released {
                    inner.outcome.clone()
                } else {
                    None
                }
            })
    }

    pub(crate) async fn wait(&self) -> ObserverResult {
        loop {
            let mut rx = self.done_rx.clone();
            if let Some(outcome) = self.peek() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as the slot; being here means the
                // slot is going away, so one final peek is all that's left.
                if let Some(outcome) = self.peek() {
                    return outcome;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObserverError;
    use serde_json::json;

    #[test]
    fn first_outcome_wins() {
        let slot = ResultSlot::new();
        assert!(slot.set(Ok(json!(1))));
        assert!(!slot.set(Ok(json!(2))));
        assert!(!slot.set(Err(ObserverError::Cancelled("x".into()))));

        slot.release();
        assert_eq!(slot.peek().unwrap().unwrap(), json!(1));
    }

    #[test]
    fn outcome_is_invisible_until_released() {
        let slot = ResultSlot::new();
        slot.set(Ok(json!("v")));
        assert!(slot.is_set());
        assert!(slot.peek().is_none());

        slot.release();
        assert_eq!(slot.peek().unwrap().unwrap(), json!("v"));
    }

    #[tokio::test]
    async fn wait_resumes_on_release() {
        let slot = std::sync::Arc::new(ResultSlot::new());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        slot.set(Ok(json!(42)));
        slot.release();

        assert_eq!(waiter.await.unwrap().unwrap(), json!(42));
    }
}
