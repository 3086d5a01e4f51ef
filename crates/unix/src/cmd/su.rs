// SPDX-License-Identifier: PolyForm-Shield-1.0

//! `su`: switches to the superuser and completes on the root prompt.

use std::sync::{Arc, OnceLock};

use connection::MolerConnection;
use observer::command::{Command, CommandBehavior, CommandContext, CommandOptions};
use regex::Regex;
use tracing::debug;

fn password_prompt_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)password:").expect("su password pattern"))
}

fn su_failure_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"su: Authentication failure|su: incorrect password|su: user \S+ does not exist|su: Permission denied")
            .expect("su failure pattern")
    })
}

pub struct Su {
    password: String,
    password_sent: bool,
}

impl Su {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            password_sent: false,
        }
    }

    pub fn build(
        connection: &Arc<MolerConnection>,
        password: impl Into<String>,
        options: CommandOptions,
    ) -> Arc<Command> {
        Command::new(connection.clone(), Box::new(Self::new(password)), options)
    }
}

impl CommandBehavior for Su {
    fn command_string(&self) -> String {
        "su".to_string()
    }

    fn failure_pattern(&self) -> Option<&Regex> {
        Some(su_failure_pattern())
    }

    fn on_new_line(&mut self, line: &str, _is_full_line: bool, ctx: &mut CommandContext<'_>) {
        if !self.password_sent && password_prompt_pattern().is_match(line) {
            debug!("su: answering password prompt");
            ctx.send_line(&self.password);
            self.password_sent = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connection::io::memory::MemoryIo;
    use connection::io::RemoteIo;
    use observer::runner::Runner;
    use observer::{Observer, ObserverError};

    #[tokio::test]
    async fn becomes_root_on_the_configured_prompt() {
        let conn = MolerConnection::new("su-ok");
        let io = MemoryIo::new(conn.clone());
        io.open().await.unwrap();

        let options = CommandOptions::with_prompt(Regex::new(r"root@\S+#").unwrap());
        let command = Su::build(&conn, "root_password", options);
        let runner = Runner::new();
        runner.submit(&command).unwrap();

        io.inject("user@host:~$ su\nPassword:\nroot@host:~# ");

        assert!(command.core().await_done().await.is_ok());
    }

    #[tokio::test]
    async fn authentication_failure_fails_the_command() {
        let conn = MolerConnection::new("su-bad");
        let io = MemoryIo::new(conn.clone());
        io.open().await.unwrap();

        let options = CommandOptions::with_prompt(Regex::new(r"root@\S+#").unwrap());
        let command = Su::build(&conn, "wrong", options);
        let runner = Runner::new();
        runner.submit(&command).unwrap();

        io.inject("user@host:~$ su\nPassword:\nsu: Authentication failure\nuser@host:~$ ");

        assert!(matches!(
            command.core().await_done().await,
            Err(ObserverError::CommandFailure(_))
        ));
    }
}
