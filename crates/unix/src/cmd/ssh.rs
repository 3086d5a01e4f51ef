// SPDX-License-Identifier: PolyForm-Shield-1.0

//! `ssh`: logs into a remote host and completes on the remote prompt.

use std::sync::{Arc, OnceLock};

use connection::MolerConnection;
use observer::command::{Command, CommandBehavior, CommandContext, CommandOptions};
use regex::Regex;
use tracing::debug;

fn password_prompt_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)password:").expect("ssh password pattern"))
}

fn host_key_question_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Are you sure you want to continue connecting").expect("ssh host key pattern")
    })
}

fn ssh_failure_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"Permission denied|No route to host|Could not resolve hostname|Connection refused|Host key verification failed",
        )
        .expect("ssh failure pattern")
    })
}

pub struct Ssh {
    host: String,
    login: String,
    password: String,
    password_sent: bool,
}

impl Ssh {
    pub fn new(
        host: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            login: login.into(),
            password: password.into(),
            password_sent: false,
        }
    }

    pub fn build(
        connection: &Arc<MolerConnection>,
        host: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
        options: CommandOptions,
    ) -> Arc<Command> {
        Command::new(
            connection.clone(),
            Box::new(Self::new(host, login, password)),
            options,
        )
    }
}

impl CommandBehavior for Ssh {
    fn command_string(&self) -> String {
        format!("ssh -l {} {}", self.login, self.host)
    }

    fn failure_pattern(&self) -> Option<&Regex> {
        Some(ssh_failure_pattern())
    }

    fn on_new_line(&mut self, line: &str, _is_full_line: bool, ctx: &mut CommandContext<'_>) {
        if host_key_question_pattern().is_match(line) {
            debug!("ssh to {}: accepting host key", self.host);
            ctx.send_line("yes");
            return;
        }
        if !self.password_sent && password_prompt_pattern().is_match(line) {
            debug!("ssh to {}: answering password prompt", self.host);
            ctx.send_line(&self.password);
            self.password_sent = true;
        }
    }
}
