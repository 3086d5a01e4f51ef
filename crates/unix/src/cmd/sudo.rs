// SPDX-License-Identifier: PolyForm-Shield-1.0

//! `sudo` wrapping another command.
//!
//! Sudo owns the connection subscription; the embedded command is never
//! subscribed. Sudo handles its own prompts (the password question, the
//! `sudo:`-prefixed failures) and forwards every other line into the
//! embedded command's parser; the embedded outcome then becomes sudo's.

use std::sync::{Arc, OnceLock};

use connection::MolerConnection;
use observer::command::{Command, CommandBehavior, CommandContext, CommandOptions};
use observer::ObserverError;
use regex::Regex;
use tracing::debug;

fn password_prompt_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[sudo\] password").expect("sudo password pattern"))
}

fn sudo_failure_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"sudo: (?:\S+: )?command not found|usage: sudo|sudo: \d+ incorrect password attempts|must be owned by uid 0 and have the setuid bit set",
        )
        .expect("sudo failure pattern")
    })
}

pub struct Sudo {
    password: String,
    password_sent: bool,
    embedded: Arc<Command>,
}

impl Sudo {
    pub fn new(password: impl Into<String>, embedded: Arc<Command>) -> Self {
        Self {
            password: password.into(),
            password_sent: false,
            embedded,
        }
    }

    pub fn build(
        connection: &Arc<MolerConnection>,
        password: impl Into<String>,
        embedded: Arc<Command>,
        options: CommandOptions,
    ) -> Arc<Command> {
        Command::new(
            connection.clone(),
            Box::new(Self::new(password, embedded)),
            options,
        )
    }
}

impl CommandBehavior for Sudo {
    fn command_string(&self) -> String {
        format!("sudo {}", self.embedded.command_string())
    }

    fn failure_pattern(&self) -> Option<&Regex> {
        Some(sudo_failure_pattern())
    }

    fn on_start(&mut self, ctx: &mut CommandContext<'_>) {
        if self.embedded.is_done() {
            ctx.set_exception(ObserverError::CommandFailure(format!(
                "embedded command '{}' has already run; observers are single-shot",
                self.embedded.command_string()
            )));
        }
    }

    fn on_new_line(&mut self, line: &str, is_full_line: bool, ctx: &mut CommandContext<'_>) {
        if password_prompt_pattern().is_match(line) {
            if !self.password_sent {
                debug!("sudo: answering password prompt");
                ctx.send_line(&self.password);
                self.password_sent = true;
            }
            return;
        }

        self.embedded.consume_line(line, is_full_line);
        if self.embedded.is_done() {
            match self.embedded.outcome() {
                Some(Ok(value)) => ctx.set_result(value),
                Some(Err(error)) => ctx.set_exception(ObserverError::CommandFailure(format!(
                    "embedded command '{}' failed: {error}",
                    self.embedded.command_string()
                ))),
                None => {}
            }
        }
    }

    fn result(&mut self) -> serde_json::Value {
        match self.embedded.outcome() {
            Some(Ok(value)) => value,
            _ => serde_json::Value::Null,
        }
    }
}
