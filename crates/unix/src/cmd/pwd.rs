// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::sync::Arc;

use connection::MolerConnection;
use observer::command::{Command, CommandBehavior, CommandContext, CommandOptions};
use regex::Regex;
use serde_json::json;

use crate::cmd::generic_failure_pattern;

/// `pwd`: resolves the working directory into its path components.
pub struct Pwd {
    full_path: Option<String>,
}

impl Pwd {
    pub fn new() -> Self {
        Self { full_path: None }
    }

    pub fn build(connection: &Arc<MolerConnection>, options: CommandOptions) -> Arc<Command> {
        Command::new(connection.clone(), Box::new(Self::new()), options)
    }
}

impl Default for Pwd {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBehavior for Pwd {
    fn command_string(&self) -> String {
        "pwd".to_string()
    }

    fn failure_pattern(&self) -> Option<&Regex> {
        Some(generic_failure_pattern())
    }

    fn on_new_line(&mut self, line: &str, is_full_line: bool, _ctx: &mut CommandContext<'_>) {
        if is_full_line && self.full_path.is_none() && line.starts_with('/') {
            self.full_path = Some(line.trim_end().to_string());
        }
    }

    fn result(&mut self) -> serde_json::Value {
        match &self.full_path {
            Some(full_path) => {
                let (path_to_current, current_path) =
                    full_path.rsplit_once('/').unwrap_or(("", full_path.as_str()));
                json!({
                    "current_path": current_path,
                    "full_path": full_path,
                    "path_to_current": path_to_current,
                })
            }
            None => json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connection::io::memory::MemoryIo;
    use connection::io::RemoteIo;
    use observer::runner::Runner;
    use observer::Observer;

    #[tokio::test]
    async fn parses_the_working_directory() {
        let conn = MolerConnection::new("pwd-test");
        let io = MemoryIo::new(conn.clone());
        io.open().await.unwrap();

        let command = Pwd::build(&conn, CommandOptions::default());
        let runner = Runner::new();
        runner.submit(&command).unwrap();

        io.inject("user@host:~/moler$ pwd\n/home/user/moler\nuser@host:~/moler$ ");

        let result = command.core().await_done().await.unwrap();
        assert_eq!(
            result,
            json!({
                "current_path": "moler",
                "full_path": "/home/user/moler",
                "path_to_current": "/home/user",
            })
        );
    }

    #[tokio::test]
    async fn missing_directory_fails_via_generic_pattern() {
        let conn = MolerConnection::new("pwd-fail");
        let io = MemoryIo::new(conn.clone());
        io.open().await.unwrap();

        let command = Pwd::build(&conn, CommandOptions::default());
        let runner = Runner::new();
        runner.submit(&command).unwrap();

        io.inject("user@host:~$ pwd\npwd: No such file or directory\nuser@host:~$ ");

        assert!(command.core().await_done().await.is_err());
    }
}
