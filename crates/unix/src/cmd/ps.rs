// SPDX-License-Identifier: PolyForm-Shield-1.0

//! `ps`: parses the column-aligned process table into per-process records.

use std::sync::Arc;

use connection::MolerConnection;
use observer::command::{Command, CommandBehavior, CommandContext, CommandOptions};
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::cmd::generic_failure_pattern;

pub struct Ps {
    command: String,
    headers: Vec<String>,
    processes: Vec<Value>,
}

impl Ps {
    pub fn new() -> Self {
        Self::with_command("ps")
    }

    /// A `ps` invocation with explicit options (e.g. `ps -o user,pid,args`).
    pub fn with_command(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            processes: Vec::new(),
        }
    }

    pub fn build(connection: &Arc<MolerConnection>, options: CommandOptions) -> Arc<Command> {
        Command::new(connection.clone(), Box::new(Self::new()), options)
    }

    fn parse_row(&mut self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < self.headers.len() {
            return;
        }
        let mut row = Map::new();
        let last = self.headers.len() - 1;
        for (index, header) in self.headers.iter().enumerate() {
            let value = if index == last {
                tokens[index..].join(" ")
            } else {
                tokens[index].to_string()
            };
            row.insert(header.clone(), cell_value(&value));
        }
        self.processes.push(Value::Object(row));
    }
}

fn cell_value(raw: &str) -> Value {
    match raw.parse::<i64>() {
        Ok(number) => json!(number),
        Err(_) => json!(raw),
    }
}

impl Default for Ps {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBehavior for Ps {
    fn command_string(&self) -> String {
        self.command.clone()
    }

    fn failure_pattern(&self) -> Option<&Regex> {
        Some(generic_failure_pattern())
    }

    fn on_new_line(&mut self, line: &str, is_full_line: bool, _ctx: &mut CommandContext<'_>) {
        if !is_full_line || line.trim().is_empty() {
            return;
        }
        if self.headers.is_empty() {
            self.headers = line
                .split_whitespace()
                .map(|h| h.to_lowercase())
                .collect();
        } else {
            self.parse_row(line);
        }
    }

    fn result(&mut self) -> Value {
        json!({ "processes": self.processes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connection::io::memory::MemoryIo;
    use connection::io::RemoteIo;
    use observer::runner::Runner;
    use observer::Observer;

    const OUTPUT_SHORT_COMMANDS: &str = "user@host:~$ ps\n\
  PID TTY          TIME CMD\n\
 1329 pts/0    00:00:00 bash\n\
 3512 pts/0    00:00:00 ps\n\
user@host:~$ ";

    const OUTPUT_LONG_COMMANDS: &str = "user@host:~$ ps\n\
  PID TTY          TIME CMD\n\
  777 ?        00:01:17 /usr/sbin/sshd -D -o ListenAddress 0.0.0.0\n\
user@host:~$ ";

    async fn run_ps(name: &str, output: &str) -> Value {
        let conn = MolerConnection::new(name);
        let io = MemoryIo::new(conn.clone());
        io.open().await.unwrap();

        let command = Ps::build(&conn, CommandOptions::default());
        let runner = Runner::new();
        runner.submit(&command).unwrap();
        io.inject(output);
        command.core().await_done().await.unwrap()
    }

    #[tokio::test]
    async fn parses_short_commands() {
        let result = run_ps("ps-short", OUTPUT_SHORT_COMMANDS).await;
        assert_eq!(
            result,
            json!({
                "processes": [
                    { "pid": 1329, "tty": "pts/0", "time": "00:00:00", "cmd": "bash" },
                    { "pid": 3512, "tty": "pts/0", "time": "00:00:00", "cmd": "ps" },
                ]
            })
        );
    }

    #[tokio::test]
    async fn keeps_whole_long_commands_in_the_last_column() {
        let result = run_ps("ps-long", OUTPUT_LONG_COMMANDS).await;
        assert_eq!(
            result["processes"][0]["cmd"],
            json!("/usr/sbin/sshd -D -o ListenAddress 0.0.0.0")
        );
    }
}
