// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Commands: observers that send a line and parse the response until an
//! expected prompt.
//!
//! A [`Command`] owns the generic machinery — sending the command line on
//! start, assembling chunks into lines, consuming the command echo, checking
//! the failure indication, matching the expected prompt — and delegates the
//! command-specific parsing to a [`CommandBehavior`]. Behaviors stay small:
//! they look at one line at a time and accumulate the structured result.
//!
//! Commands compose: a wrapping command (sudo) keeps the connection
//! subscription to itself and forwards non-specific lines into an embedded
//! command through [`Command::consume_line`], which bypasses subscription
//! and echo handling on the inner side.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use connection::{MolerConnection, StreamSubscriber};
use regex::Regex;
use tracing::{debug, trace, warn};

use crate::{LineAssembler, Observer, ObserverCore, ObserverError, ObserverResult};

/// Prompt used when a command is not given an explicit one: a line ending
/// in a typical shell prompt character.
pub const DEFAULT_PROMPT: &str = r"[$%#>~]\s*$";

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-command knobs; the defaults suit an interactive unix shell.
pub struct CommandOptions {
    /// Pattern that terminates the command when matched at end of line.
    pub expected_prompt: Option<Regex>,
    /// Newline sequence appended to everything this command sends.
    pub newline: String,
    /// Deadline armed by the runner on start.
    pub timeout: Duration,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            expected_prompt: None,
            newline: "\n".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl CommandOptions {
    pub fn with_prompt(prompt: Regex) -> Self {
        Self {
            expected_prompt: Some(prompt),
            ..Self::default()
        }
    }
}

/// Line-level interface a behavior uses to finish its command or talk back
/// over the connection (answering a password prompt, confirming a host key).
pub struct CommandContext<'a> {
    connection: &'a Arc<MolerConnection>,
    newline: &'a str,
    outcome: Option<ObserverResult>,
}

impl CommandContext<'_> {
    /// Send `text` followed by this command's newline sequence.
    pub fn send_line(&mut self, text: &str) {
        let payload = format!("{}{}", text, self.newline);
        if let Err(e) = self.connection.send(&payload) {
            self.set_exception(ObserverError::Connection(e));
        }
    }

    pub fn set_result(&mut self, value: serde_json::Value) {
        if self.outcome.is_none() {
            self.outcome = Some(Ok(value));
        }
    }

    pub fn set_exception(&mut self, error: ObserverError) {
        if self.outcome.is_none() {
            self.outcome = Some(Err(error));
        }
    }
}

/// Command-specific parsing, one line at a time.
pub trait CommandBehavior: Send {
    /// The exact command line sent on start (without the newline).
    fn command_string(&self) -> String;

    /// Pattern recognising failure output; checked on full lines before
    /// `on_new_line`.
    fn failure_pattern(&self) -> Option<&Regex> {
        None
    }

    /// Hook run before the command line is sent; a recorded exception here
    /// aborts the start.
    fn on_start(&mut self, _ctx: &mut CommandContext<'_>) {}

    /// Called for every line after the command echo, partial lines included.
    fn on_new_line(&mut self, line: &str, is_full_line: bool, ctx: &mut CommandContext<'_>);

    /// The accumulated structured result, installed when the expected
    /// prompt is seen.
    fn result(&mut self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

struct CommandState {
    behavior: Box<dyn CommandBehavior>,
    assembler: LineAssembler,
    echo_consumed: bool,
    command_string: String,
    expected_prompt: Regex,
    newline: String,
}

pub struct Command {
    core: ObserverCore,
    state: Mutex<CommandState>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command").finish_non_exhaustive()
    }
}

impl Command {
    pub fn new(
        connection: Arc<MolerConnection>,
        behavior: Box<dyn CommandBehavior>,
        options: CommandOptions,
    ) -> Arc<Self> {
        let command_string = behavior.command_string();
        let expected_prompt = options
            .expected_prompt
            .unwrap_or_else(|| Regex::new(DEFAULT_PROMPT).expect("default prompt pattern"));
        let core = ObserverCore::new(command_string.clone(), connection, options.timeout);
        Arc::new(Self {
            core,
            state: Mutex::new(CommandState {
                behavior,
                assembler: LineAssembler::new(),
                echo_consumed: false,
                command_string,
                expected_prompt,
                newline: options.newline,
            }),
        })
    }

    pub fn command_string(&self) -> String {
        self.state
            .lock()
            .map(|st| st.command_string.clone())
            .unwrap_or_default()
    }

    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    pub fn outcome(&self) -> Option<ObserverResult> {
        self.core.outcome()
    }

    /// Hand the command to a runner: subscribe, arm the timeout, send the
    /// command line. Non-blocking; fails on reuse or after `cancel`.
    pub fn start(self: &Arc<Self>, runner: &crate::runner::Runner) -> Result<(), ObserverError> {
        runner.submit(self)
    }

    /// `start` + `await_done` in one call.
    pub async fn run(self: &Arc<Self>, runner: &crate::runner::Runner) -> ObserverResult {
        self.start(runner)?;
        self.core.await_done().await
    }

    /// Feed one already-assembled line into this command's parser.
    ///
    /// Composition hook for wrapping commands: skips echo handling and does
    /// not require (or touch) any connection subscription.
    pub fn consume_line(&self, line: &str, is_full_line: bool) {
        if self.core.is_done() {
            return;
        }
        let decided = {
            let Ok(mut st) = self.state.lock() else {
                warn!("command '{}': state lock poisoned", self.core.name());
                return;
            };
            self.run_lines(&mut st, vec![(line.to_string(), is_full_line)], true)
        };
        self.apply(decided);
    }

    /// Drive the generic per-line pipeline: echo, failure indication,
    /// behavior callback, prompt. Returns the first decided outcome.
    fn run_lines(
        &self,
        st: &mut CommandState,
        lines: Vec<(String, bool)>,
        skip_echo: bool,
    ) -> Option<ObserverResult> {
        let connection = self.core.connection().clone();
        let newline = st.newline.clone();
        let mut ctx = CommandContext {
            connection: &connection,
            newline: &newline,
            outcome: None,
        };

        for (line, is_full_line) in lines {
            if self.core.is_done() {
                return None;
            }
            if !skip_echo && !st.echo_consumed {
                if is_full_line && is_command_echo(&line, &st.command_string) {
                    st.echo_consumed = true;
                    trace!("command '{}': echo consumed", st.command_string);
                }
                continue;
            }

            if is_full_line {
                if let Some(pattern) = st.behavior.failure_pattern() {
                    if pattern.is_match(&line) {
                        ctx.set_exception(ObserverError::CommandFailure(format!(
                            "command failed in line '{line}'"
                        )));
                    }
                }
            }

            if ctx.outcome.is_none() {
                st.behavior.on_new_line(&line, is_full_line, &mut ctx);
            }

            if ctx.outcome.is_none() && st.expected_prompt.is_match(line.trim_end()) {
                trace!("command '{}': prompt reached", st.command_string);
                let value = st.behavior.result();
                ctx.set_result(value);
            }

            if ctx.outcome.is_some() {
                return ctx.outcome.take();
            }
        }
        None
    }

    fn apply(&self, decided: Option<ObserverResult>) {
        match decided {
            Some(Ok(value)) => {
                self.core.set_result(value);
            }
            Some(Err(error)) => {
                self.core.set_exception(error);
            }
            None => {}
        }
    }
}

fn is_command_echo(line: &str, command: &str) -> bool {
    let line = line.trim_end();
    let command = command.trim_end();
    line == command || line.ends_with(command)
}

impl StreamSubscriber for Command {
    fn on_data(&self, chunk: &str, _received_at: SystemTime) {
        if self.core.is_done() {
            return;
        }
        let decided = {
            let Ok(mut st) = self.state.lock() else {
                warn!("command '{}': state lock poisoned", self.core.name());
                return;
            };
            let lines = st.assembler.feed(chunk);
            self.run_lines(&mut st, lines, false)
        };
        self.apply(decided);
    }
}

impl Observer for Command {
    fn core(&self) -> &ObserverCore {
        &self.core
    }

    fn on_start(&self) -> Result<(), ObserverError> {
        let command_line = {
            let Ok(mut st) = self.state.lock() else {
                return Err(ObserverError::WrongUsage(format!(
                    "command '{}': state lock poisoned",
                    self.core.name()
                )));
            };
            let connection = self.core.connection().clone();
            let newline = st.newline.clone();
            let mut ctx = CommandContext {
                connection: &connection,
                newline: &newline,
                outcome: None,
            };
            st.behavior.on_start(&mut ctx);
            if let Some(Err(error)) = ctx.outcome {
                return Err(error);
            }
            format!("{}{}", st.command_string, st.newline)
        };
        self.core.connection().send(&command_line)?;
        debug!("command '{}': sent", self.core.name());
        Ok(())
    }
}
