// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Events: long-running observers for recurring patterns.
//!
//! Unlike commands, events send nothing and have no echo to consume; they
//! watch the stream line by line until their behavior recognises the
//! pattern it was built for. The single-shot slot resolves on the first
//! match.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use connection::{MolerConnection, StreamSubscriber};
use tracing::warn;

use crate::{LineAssembler, Observer, ObserverCore, ObserverResult};

const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Pattern recognition for an event, one line at a time. Returning a value
/// resolves the event.
pub trait EventBehavior: Send {
    fn on_line(
        &mut self,
        line: &str,
        is_full_line: bool,
        received_at: SystemTime,
    ) -> Option<serde_json::Value>;
}

struct EventState {
    behavior: Box<dyn EventBehavior>,
    assembler: LineAssembler,
}

pub struct Event {
    core: ObserverCore,
    state: Mutex<EventState>,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        connection: Arc<MolerConnection>,
        behavior: Box<dyn EventBehavior>,
    ) -> Arc<Self> {
        Self::with_timeout(name, connection, behavior, DEFAULT_EVENT_TIMEOUT)
    }

    pub fn with_timeout(
        name: impl Into<String>,
        connection: Arc<MolerConnection>,
        behavior: Box<dyn EventBehavior>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ObserverCore::new(name, connection, timeout),
            state: Mutex::new(EventState {
                behavior,
                assembler: LineAssembler::new(),
            }),
        })
    }

    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    pub fn outcome(&self) -> Option<ObserverResult> {
        self.core.outcome()
    }

    /// Hand the event to a runner: subscribe and arm the timeout.
    pub fn start(self: &Arc<Self>, runner: &crate::runner::Runner) -> Result<(), crate::ObserverError> {
        runner.submit(self)
    }

    /// `start` + `await_done` in one call.
    pub async fn run(self: &Arc<Self>, runner: &crate::runner::Runner) -> ObserverResult {
        self.start(runner)?;
        self.core.await_done().await
    }
}

impl StreamSubscriber for Event {
    fn on_data(&self, chunk: &str, received_at: SystemTime) {
        if self.core.is_done() {
            return;
        }
        let matched = {
            let Ok(mut st) = self.state.lock() else {
                warn!("event '{}': state lock poisoned", self.core.name());
                return;
            };
            let lines = st.assembler.feed(chunk);
            let mut matched = None;
            for (line, is_full_line) in lines {
                if let Some(value) = st.behavior.on_line(&line, is_full_line, received_at) {
                    matched = Some(value);
                    break;
                }
            }
            matched
        };
        if let Some(value) = matched {
            self.core.set_result(value);
        }
    }
}

impl Observer for Event {
    fn core(&self) -> &ObserverCore {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Runner;
    use serde_json::json;

    struct LineMatcher {
        needle: &'static str,
    }

    impl EventBehavior for LineMatcher {
        fn on_line(
            &mut self,
            line: &str,
            is_full_line: bool,
            _received_at: SystemTime,
        ) -> Option<serde_json::Value> {
            (is_full_line && line.contains(self.needle)).then(|| json!(line))
        }
    }

    #[tokio::test]
    async fn resolves_on_first_matching_line() {
        let conn = MolerConnection::new("event-match");
        let event = Event::new(
            "needle",
            conn.clone(),
            Box::new(LineMatcher { needle: "boom" }),
        );
        let runner = Runner::new();
        runner.submit(&event).unwrap();

        conn.data_received(b"quiet line\n", SystemTime::now());
        conn.data_received(b"the boom line\nafter boom\n", SystemTime::now());

        assert_eq!(
            event.core().await_done().await.unwrap(),
            json!("the boom line")
        );
        assert_eq!(conn.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn partial_lines_do_not_match_a_full_line_matcher() {
        let conn = MolerConnection::new("event-partial");
        let event = Event::new(
            "needle",
            conn.clone(),
            Box::new(LineMatcher { needle: "boom" }),
        );
        let runner = Runner::new();
        runner.submit(&event).unwrap();

        conn.data_received(b"half a boom", SystemTime::now());
        assert!(!event.is_done());

        conn.data_received(b" finished\n", SystemTime::now());
        assert!(event.is_done());
    }
}
