// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Mapping from transition command tags and per-state command names to
//! concrete command constructors.

use std::sync::Arc;
use std::time::Duration;

use connection::MolerConnection;
use observer::command::{Command, CommandOptions};
use regex::Regex;
use unix::cmd::adb_shell::AdbShell;
use unix::cmd::exit::Exit;
use unix::cmd::ps::Ps;
use unix::cmd::pwd::Pwd;
use unix::cmd::ssh::Ssh;
use unix::cmd::su::Su;

use crate::families::{
    ADB_SHELL, PROXY_PC, UNIX_LOCAL, UNIX_LOCAL_ROOT, UNIX_REMOTE, UNIX_REMOTE_ROOT,
};
use crate::sm::{CommandKind, ParamMap};
use crate::DeviceError;

fn str_param<'a>(params: &'a ParamMap, name: &str) -> Result<&'a str, DeviceError> {
    params
        .get(name)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            DeviceError::Config(format!(
                "transition command parameter '{name}' is missing or not a string"
            ))
        })
}

/// Options assembled from a transition's merged `command_params`:
/// `expected_prompt`, `target_newline`, and an optional `timeout` (seconds).
pub fn options_from_params(params: &ParamMap) -> Result<CommandOptions, DeviceError> {
    let mut options = CommandOptions::default();
    if let Some(prompt) = params.get("expected_prompt").and_then(serde_json::Value::as_str) {
        let compiled = Regex::new(prompt).map_err(|e| {
            DeviceError::Config(format!("bad expected_prompt pattern '{prompt}': {e}"))
        })?;
        options.expected_prompt = Some(compiled);
    }
    if let Some(newline) = params.get("target_newline").and_then(serde_json::Value::as_str) {
        options.newline = newline.to_string();
    }
    if let Some(seconds) = params.get("timeout").and_then(serde_json::Value::as_f64) {
        options.timeout = Duration::from_secs_f64(seconds);
    }
    Ok(options)
}

/// Construct the command backing a transition edge.
pub fn build_transition_command(
    kind: CommandKind,
    params: &ParamMap,
    connection: &Arc<MolerConnection>,
) -> Result<Arc<Command>, DeviceError> {
    let options = options_from_params(params)?;
    let command = match kind {
        CommandKind::Ssh => {
            let host = str_param(params, "host")?;
            let login = str_param(params, "login")?;
            let password = str_param(params, "password")?;
            Ssh::build(connection, host, login, password, options)
        }
        CommandKind::Su => {
            let password = params
                .get("password")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("root_password");
            Su::build(connection, password, options)
        }
        CommandKind::Exit => Exit::build(connection, options),
        CommandKind::AdbShell => {
            let serial_number = str_param(params, "serial_number")?;
            AdbShell::build(connection, serial_number, options)
        }
    };
    Ok(command)
}

/// Commands a caller may construct through a device while it sits in the
/// given state.
pub fn command_names_for_state(state: &str) -> &'static [&'static str] {
    match state {
        UNIX_LOCAL | UNIX_LOCAL_ROOT | PROXY_PC | UNIX_REMOTE | UNIX_REMOTE_ROOT => {
            &["ssh", "su", "exit", "pwd", "ps", "adb_shell"]
        }
        ADB_SHELL => &["exit", "pwd", "ps"],
        _ => &[],
    }
}

/// Construct a command by package name, for the per-state lookup on a
/// device. Wrapping commands (sudo) take another command as payload and are
/// built directly against the unix crate instead.
pub fn build_named_command(
    name: &str,
    params: &ParamMap,
    connection: &Arc<MolerConnection>,
) -> Result<Arc<Command>, DeviceError> {
    let options = options_from_params(params)?;
    let command = match name {
        "ssh" => build_transition_command(CommandKind::Ssh, params, connection)?,
        "su" => build_transition_command(CommandKind::Su, params, connection)?,
        "exit" => Exit::build(connection, options),
        "adb_shell" => build_transition_command(CommandKind::AdbShell, params, connection)?,
        "pwd" => Pwd::build(connection, options),
        "ps" => Ps::build(connection, options),
        other => {
            return Err(DeviceError::Config(format!(
                "unknown command package entry '{other}'"
            )))
        }
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn ssh_requires_host_login_and_password() {
        let connection = MolerConnection::new("cmds-ssh");
        let err = build_transition_command(
            CommandKind::Ssh,
            &params(&[("host", json!("h"))]),
            &connection,
        )
        .unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));

        let ok = build_transition_command(
            CommandKind::Ssh,
            &params(&[
                ("host", json!("h")),
                ("login", json!("l")),
                ("password", json!("p")),
                ("expected_prompt", json!("h\\$")),
            ]),
            &connection,
        )
        .unwrap();
        assert_eq!(ok.command_string(), "ssh -l l h");
    }

    #[test]
    fn bad_prompt_pattern_is_a_config_error() {
        let connection = MolerConnection::new("cmds-prompt");
        let err = build_transition_command(
            CommandKind::Exit,
            &params(&[("expected_prompt", json!("["))]),
            &connection,
        )
        .unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));
    }

    #[test]
    fn adb_shell_state_has_a_reduced_package() {
        assert!(command_names_for_state(ADB_SHELL).contains(&"pwd"));
        assert!(!command_names_for_state(ADB_SHELL).contains(&"ssh"));
        assert!(command_names_for_state("NOT_CONNECTED").is_empty());
    }
}
