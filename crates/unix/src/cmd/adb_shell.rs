// SPDX-License-Identifier: PolyForm-Shield-1.0

//! `adb shell`: enters the shell of an android device attached over adb.

use std::sync::{Arc, OnceLock};

use connection::MolerConnection;
use observer::command::{Command, CommandBehavior, CommandContext, CommandOptions};
use regex::Regex;

fn adb_failure_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"error: device '\S+' not found|adb: no devices/emulators found")
            .expect("adb failure pattern")
    })
}

pub struct AdbShell {
    serial_number: String,
}

impl AdbShell {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
        }
    }

    pub fn build(
        connection: &Arc<MolerConnection>,
        serial_number: impl Into<String>,
        options: CommandOptions,
    ) -> Arc<Command> {
        Command::new(
            connection.clone(),
            Box::new(Self::new(serial_number)),
            options,
        )
    }
}

impl CommandBehavior for AdbShell {
    fn command_string(&self) -> String {
        format!("adb -s {} shell", self.serial_number)
    }

    fn failure_pattern(&self) -> Option<&Regex> {
        Some(adb_failure_pattern())
    }

    fn on_new_line(&mut self, _line: &str, _is_full_line: bool, _ctx: &mut CommandContext<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use connection::io::memory::MemoryIo;
    use connection::io::RemoteIo;
    use observer::runner::Runner;
    use observer::{Observer, ObserverError};

    #[tokio::test]
    async fn unknown_device_is_a_command_failure() {
        let conn = MolerConnection::new("adb-missing");
        let io = MemoryIo::new(conn.clone());
        io.open().await.unwrap();

        let command = AdbShell::build(&conn, "1234567890", CommandOptions::default());
        let runner = Runner::new();
        runner.submit(&command).unwrap();

        io.inject("remote$ adb -s 1234567890 shell\nerror: device '1234567890' not found\nremote$ ");

        assert!(matches!(
            command.core().await_done().await,
            Err(ObserverError::CommandFailure(_))
        ));
    }

    #[tokio::test]
    async fn enters_the_android_shell_prompt() {
        let conn = MolerConnection::new("adb-ok");
        let io = MemoryIo::new(conn.clone());
        io.open().await.unwrap();

        let options = CommandOptions::with_prompt(Regex::new(r"shell@\S+:/ \$").unwrap());
        let command = AdbShell::build(&conn, "1234567890", options);
        let runner = Runner::new();
        runner.submit(&command).unwrap();

        io.inject("remote$ adb -s 1234567890 shell\nshell@android:/ $ ");

        assert!(command.core().await_done().await.is_ok());
    }
}
