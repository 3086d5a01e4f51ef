// SPDX-License-Identifier: PolyForm-Shield-1.0

//! `exit`: leaves the current shell and completes on the enclosing prompt.

use std::sync::Arc;

use connection::MolerConnection;
use observer::command::{Command, CommandBehavior, CommandContext, CommandOptions};

pub struct Exit;

impl Exit {
    pub fn build(connection: &Arc<MolerConnection>, options: CommandOptions) -> Arc<Command> {
        Command::new(connection.clone(), Box::new(Self), options)
    }
}

impl CommandBehavior for Exit {
    fn command_string(&self) -> String {
        "exit".to_string()
    }

    fn on_new_line(&mut self, _line: &str, _is_full_line: bool, _ctx: &mut CommandContext<'_>) {}
}
