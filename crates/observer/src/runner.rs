// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Observer scheduling.
//!
//! The runner concentrates the three things that would otherwise be
//! scattered: timeout accounting, the subscribe/unsubscribe pairing across
//! every terminal path, and the bridge from event-driven completion to a
//! waitable outcome. Parsing itself never runs on a runner worker; it is
//! driven by the connection's fan-out. The per-observer task only watches
//! the clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use connection::StreamSubscriber;
use tracing::{debug, info, warn};

use crate::{Observer, ObserverCore, ObserverError, ObserverResult};

struct RunnerInner {
    accepting: AtomicBool,
    running: Mutex<Vec<Weak<dyn Observer>>>,
}

/// Schedules observers over their connections; cheap to clone.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<RunnerInner>,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                accepting: AtomicBool::new(true),
                running: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start an observer: validate its lifecycle, subscribe it to its
    /// connection, arm the timeout watchdog, then run its start action.
    ///
    /// Subscription happens synchronously in here, before the start action
    /// and before this returns, so a command that triggers output on start
    /// can never miss its first bytes.
    pub fn submit<O>(&self, observer: &Arc<O>) -> Result<(), ObserverError>
    where
        O: Observer + 'static,
    {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(ObserverError::WrongUsage(
                "runner is shut down; it no longer accepts observers".into(),
            ));
        }

        let core = observer.core();
        core.mark_started()?;

        let subscription = core
            .connection()
            .subscribe(Arc::downgrade(observer) as Weak<dyn StreamSubscriber>);
        core.set_subscription(subscription);

        if let Ok(mut running) = self.inner.running.lock() {
            running.retain(|weak| weak.strong_count() > 0);
            running.push(Arc::downgrade(observer) as Weak<dyn Observer>);
        } else {
            warn!("runner: running set lock poisoned on submit");
        }

        let timeout = core.timeout();
        debug!(
            "runner: submitted observer '{}' with timeout {:?}",
            core.name(),
            timeout
        );

        let watched = observer.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watched.core().await_done() => {}
                _ = tokio::time::sleep(timeout) => {
                    let core = watched.core();
                    if core.set_exception(ObserverError::Timeout {
                        name: core.name().to_string(),
                        after: timeout,
                    }) {
                        debug!("runner: observer '{}' timed out after {:?}", core.name(), timeout);
                    }
                }
            }
        });

        if let Err(e) = observer.on_start() {
            core.set_exception(e.clone());
            return Err(e);
        }
        Ok(())
    }

    /// Block the caller until the observer is terminal, with an optional
    /// caller-side deadline. On expiry the timeout is recorded on the
    /// observer (unless it is already terminal) and returned.
    pub async fn wait_for(
        &self,
        core: &ObserverCore,
        timeout: Option<Duration>,
    ) -> ObserverResult {
        match timeout {
            None => core.await_done().await,
            Some(deadline) => match tokio::time::timeout(deadline, core.await_done()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    core.set_exception(ObserverError::Timeout {
                        name: core.name().to_string(),
                        after: deadline,
                    });
                    core.await_done().await
                }
            },
        }
    }

    /// Cancel every still-running observer and stop accepting submissions.
    /// Safe to call repeatedly.
    pub fn shutdown(&self) {
        let first = self.inner.accepting.swap(false, Ordering::SeqCst);
        let survivors: Vec<Arc<dyn Observer>> = match self.inner.running.lock() {
            Ok(mut running) => running.drain(..).filter_map(|weak| weak.upgrade()).collect(),
            Err(_) => {
                warn!("runner: running set lock poisoned on shutdown");
                Vec::new()
            }
        };
        let cancelled = survivors
            .iter()
            .filter(|observer| observer.core().cancel())
            .count();
        if first || cancelled > 0 {
            info!("runner shut down, cancelled {} running observers", cancelled);
        }
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}
