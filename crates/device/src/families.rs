// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Device families and their layered default configurations.
//!
//! Each family is a function returning a partial configuration; the
//! effective machine is the deep merge of the chain (local shell → proxy →
//! remote → adb), with the proxy layer switched by `use_proxy` and the
//! open/close edges switched by the io kind. A terminal io starts in the
//! local shell; a sshshell io opens straight into the first remote state
//! and has no unix-local states at all.

use connection::io::IoKind;
use serde::{Deserialize, Serialize};

use crate::merge::merge_sm_config;
use crate::sm::{CommandKind, HopSpec, SmConfig, TransitionAction};

pub const NOT_CONNECTED: &str = "NOT_CONNECTED";
pub const UNIX_LOCAL: &str = "UNIX_LOCAL";
pub const UNIX_LOCAL_ROOT: &str = "UNIX_LOCAL_ROOT";
pub const PROXY_PC: &str = "PROXY_PC";
pub const UNIX_REMOTE: &str = "UNIX_REMOTE";
pub const UNIX_REMOTE_ROOT: &str = "UNIX_REMOTE_ROOT";
pub const ADB_SHELL: &str = "ADB_SHELL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    UnixLocal,
    ProxyPc,
    UnixRemote,
    AdbRemote,
}

impl DeviceFamily {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "unix_local" => Some(Self::UnixLocal),
            "proxy_pc" => Some(Self::ProxyPc),
            "unix_remote" => Some(Self::UnixRemote),
            "adb_remote" => Some(Self::AdbRemote),
            _ => None,
        }
    }

    pub fn default_initial_state(&self) -> &'static str {
        match self {
            Self::UnixLocal => UNIX_LOCAL,
            Self::ProxyPc => PROXY_PC,
            Self::UnixRemote => UNIX_REMOTE,
            Self::AdbRemote => ADB_SHELL,
        }
    }
}

/// A memory loopback simulates a local terminal; everything else that is
/// not an explicit remote-access io does too.
pub fn behaves_like_terminal(io_kind: IoKind) -> bool {
    matches!(io_kind, IoKind::Terminal | IoKind::Memory)
}

fn edge(config: &mut SmConfig, from: &str, to: &str, action: TransitionAction) {
    config
        .transitions
        .entry(from.to_string())
        .or_default()
        .insert(to.to_string(), action);
}

fn command_edge(config: &mut SmConfig, from: &str, to: &str, spec: HopSpec) {
    edge(config, from, to, TransitionAction::ExecuteCommand);
    config
        .connection_hops
        .entry(from.to_string())
        .or_default()
        .insert(to.to_string(), spec);
}

fn state_hop(config: &mut SmConfig, from: &str, target: &str, via: &str) {
    config
        .state_hops
        .entry(from.to_string())
        .or_default()
        .insert(target.to_string(), via.to_string());
}

fn state_hops(config: &mut SmConfig, entries: &[(&str, &str, &str)]) {
    for (from, target, via) in entries {
        state_hop(config, from, target, via);
    }
}

/// Local shell with a root escalation; requires a terminal io.
fn unix_local_layer() -> SmConfig {
    let mut config = SmConfig::default();
    edge(&mut config, NOT_CONNECTED, UNIX_LOCAL, TransitionAction::OpenConnection);
    edge(&mut config, UNIX_LOCAL, NOT_CONNECTED, TransitionAction::CloseConnection);
    command_edge(
        &mut config,
        UNIX_LOCAL,
        UNIX_LOCAL_ROOT,
        HopSpec::command(CommandKind::Su)
            .param("password", "root_password")
            .param("expected_prompt", r"^root@\S+#")
            .param("target_newline", "\n"),
    );
    command_edge(
        &mut config,
        UNIX_LOCAL_ROOT,
        UNIX_LOCAL,
        HopSpec::command(CommandKind::Exit)
            .param("expected_prompt", "^moler_bash#")
            .param("target_newline", "\n"),
    );
    state_hops(
        &mut config,
        &[
            (NOT_CONNECTED, UNIX_LOCAL_ROOT, UNIX_LOCAL),
            (UNIX_LOCAL_ROOT, NOT_CONNECTED, UNIX_LOCAL),
        ],
    );
    config
}

/// Proxy host reached over ssh from the local shell (terminal io).
fn proxy_pc_terminal_layer() -> SmConfig {
    let mut config = SmConfig::default();
    command_edge(
        &mut config,
        UNIX_LOCAL,
        PROXY_PC,
        HopSpec::command(CommandKind::Ssh)
            .param("target_newline", "\n")
            .require(&["host", "login", "password", "expected_prompt"]),
    );
    command_edge(
        &mut config,
        PROXY_PC,
        UNIX_LOCAL,
        HopSpec::command(CommandKind::Exit)
            .param("target_newline", "\n")
            .require(&["expected_prompt"]),
    );
    state_hops(
        &mut config,
        &[
            (NOT_CONNECTED, PROXY_PC, UNIX_LOCAL),
            (PROXY_PC, NOT_CONNECTED, UNIX_LOCAL),
            (PROXY_PC, UNIX_LOCAL_ROOT, UNIX_LOCAL),
            (UNIX_LOCAL_ROOT, PROXY_PC, UNIX_LOCAL),
        ],
    );
    config
}

/// Proxy host entered directly by the sshshell io.
fn proxy_pc_sshshell_layer() -> SmConfig {
    let mut config = SmConfig::default();
    edge(&mut config, NOT_CONNECTED, PROXY_PC, TransitionAction::OpenConnection);
    edge(&mut config, PROXY_PC, NOT_CONNECTED, TransitionAction::CloseConnection);
    config
}

fn su_to_remote_root() -> HopSpec {
    HopSpec::command(CommandKind::Su)
        .param("password", "root_password")
        .param("expected_prompt", "remote_root_prompt")
        .param("target_newline", "\n")
}

fn exit_to_remote() -> HopSpec {
    HopSpec::command(CommandKind::Exit)
        .param("expected_prompt", "remote_user_prompt")
        .param("target_newline", "\n")
}

/// Remote host reached through the proxy.
fn unix_remote_with_proxy_layer() -> SmConfig {
    let mut config = SmConfig::default();
    command_edge(
        &mut config,
        PROXY_PC,
        UNIX_REMOTE,
        HopSpec::command(CommandKind::Ssh)
            .param("target_newline", "\n")
            .require(&["host", "login", "password", "expected_prompt"]),
    );
    command_edge(
        &mut config,
        UNIX_REMOTE,
        PROXY_PC,
        HopSpec::command(CommandKind::Exit)
            .param("target_newline", "\n")
            .require(&["expected_prompt"]),
    );
    command_edge(&mut config, UNIX_REMOTE, UNIX_REMOTE_ROOT, su_to_remote_root());
    command_edge(&mut config, UNIX_REMOTE_ROOT, UNIX_REMOTE, exit_to_remote());
    config
}

/// Remote host reached straight from the local shell.
fn unix_remote_without_proxy_layer() -> SmConfig {
    let mut config = SmConfig::default();
    command_edge(
        &mut config,
        UNIX_LOCAL,
        UNIX_REMOTE,
        HopSpec::command(CommandKind::Ssh)
            .param("target_newline", "\n")
            .require(&["host", "login", "password", "expected_prompt"]),
    );
    command_edge(
        &mut config,
        UNIX_REMOTE,
        UNIX_LOCAL,
        HopSpec::command(CommandKind::Exit)
            .param("expected_prompt", "^moler_bash#")
            .param("target_newline", "\n"),
    );
    command_edge(&mut config, UNIX_REMOTE, UNIX_REMOTE_ROOT, su_to_remote_root());
    command_edge(&mut config, UNIX_REMOTE_ROOT, UNIX_REMOTE, exit_to_remote());
    config
}

/// Remote host entered directly by the sshshell io.
fn unix_remote_sshshell_layer() -> SmConfig {
    let mut config = SmConfig::default();
    edge(&mut config, NOT_CONNECTED, UNIX_REMOTE, TransitionAction::OpenConnection);
    edge(&mut config, UNIX_REMOTE, NOT_CONNECTED, TransitionAction::CloseConnection);
    command_edge(&mut config, UNIX_REMOTE, UNIX_REMOTE_ROOT, su_to_remote_root());
    command_edge(&mut config, UNIX_REMOTE_ROOT, UNIX_REMOTE, exit_to_remote());
    config
}

/// Android shell reached over adb from the remote host.
fn adb_layer() -> SmConfig {
    let mut config = SmConfig::default();
    command_edge(
        &mut config,
        UNIX_REMOTE,
        ADB_SHELL,
        HopSpec::command(CommandKind::AdbShell)
            .param("expected_prompt", r"^shell@\S+:/ \$")
            .param("target_newline", "\n")
            .require(&["serial_number"]),
    );
    command_edge(&mut config, ADB_SHELL, UNIX_REMOTE, exit_to_remote());
    state_hops(
        &mut config,
        &[
            (UNIX_REMOTE_ROOT, ADB_SHELL, UNIX_REMOTE),
            (ADB_SHELL, NOT_CONNECTED, UNIX_REMOTE),
            (ADB_SHELL, UNIX_REMOTE_ROOT, UNIX_REMOTE),
        ],
    );
    config
}

fn with_proxy_terminal_state_hops(config: &mut SmConfig) {
    state_hops(
        config,
        &[
            (NOT_CONNECTED, UNIX_REMOTE, UNIX_LOCAL),
            (NOT_CONNECTED, PROXY_PC, UNIX_LOCAL),
            (NOT_CONNECTED, UNIX_LOCAL_ROOT, UNIX_LOCAL),
            (NOT_CONNECTED, UNIX_REMOTE_ROOT, UNIX_LOCAL),
            (UNIX_REMOTE, NOT_CONNECTED, PROXY_PC),
            (UNIX_REMOTE, UNIX_LOCAL, PROXY_PC),
            (UNIX_REMOTE, UNIX_LOCAL_ROOT, PROXY_PC),
            (UNIX_LOCAL_ROOT, UNIX_REMOTE, UNIX_LOCAL),
            (UNIX_LOCAL_ROOT, UNIX_REMOTE_ROOT, UNIX_LOCAL),
            (PROXY_PC, NOT_CONNECTED, UNIX_LOCAL),
            (PROXY_PC, UNIX_LOCAL_ROOT, UNIX_LOCAL),
            (PROXY_PC, UNIX_REMOTE_ROOT, UNIX_REMOTE),
            (UNIX_LOCAL, UNIX_REMOTE, PROXY_PC),
            (UNIX_LOCAL, UNIX_REMOTE_ROOT, PROXY_PC),
            (UNIX_REMOTE_ROOT, NOT_CONNECTED, UNIX_REMOTE),
            (UNIX_REMOTE_ROOT, UNIX_LOCAL, UNIX_REMOTE),
            (UNIX_REMOTE_ROOT, UNIX_LOCAL_ROOT, UNIX_REMOTE),
            (UNIX_REMOTE_ROOT, PROXY_PC, UNIX_REMOTE),
        ],
    );
}

fn without_proxy_terminal_state_hops(config: &mut SmConfig) {
    state_hops(
        config,
        &[
            (NOT_CONNECTED, UNIX_REMOTE, UNIX_LOCAL),
            (NOT_CONNECTED, UNIX_LOCAL_ROOT, UNIX_LOCAL),
            (NOT_CONNECTED, UNIX_REMOTE_ROOT, UNIX_LOCAL),
            (UNIX_LOCAL, UNIX_REMOTE_ROOT, UNIX_REMOTE),
            (UNIX_LOCAL_ROOT, UNIX_REMOTE, UNIX_LOCAL),
            (UNIX_LOCAL_ROOT, UNIX_REMOTE_ROOT, UNIX_LOCAL),
            (UNIX_REMOTE, NOT_CONNECTED, UNIX_LOCAL),
            (UNIX_REMOTE, UNIX_LOCAL_ROOT, UNIX_LOCAL),
            (UNIX_REMOTE_ROOT, NOT_CONNECTED, UNIX_REMOTE),
            (UNIX_REMOTE_ROOT, UNIX_LOCAL, UNIX_REMOTE),
            (UNIX_REMOTE_ROOT, UNIX_LOCAL_ROOT, UNIX_REMOTE),
            // Kept although this machine has no proxy state; layered
            // tables carry the entry for uniformity.
            (UNIX_REMOTE_ROOT, PROXY_PC, UNIX_REMOTE),
        ],
    );
}

fn with_proxy_sshshell_state_hops(config: &mut SmConfig) {
    state_hops(
        config,
        &[
            (NOT_CONNECTED, UNIX_REMOTE, PROXY_PC),
            (NOT_CONNECTED, UNIX_REMOTE_ROOT, PROXY_PC),
            (PROXY_PC, UNIX_REMOTE_ROOT, UNIX_REMOTE),
            (UNIX_REMOTE, NOT_CONNECTED, PROXY_PC),
            (UNIX_REMOTE_ROOT, NOT_CONNECTED, UNIX_REMOTE),
            (UNIX_REMOTE_ROOT, PROXY_PC, UNIX_REMOTE),
        ],
    );
}

fn without_proxy_sshshell_state_hops(config: &mut SmConfig) {
    state_hops(
        config,
        &[
            (NOT_CONNECTED, UNIX_REMOTE_ROOT, UNIX_REMOTE),
            (UNIX_REMOTE_ROOT, NOT_CONNECTED, UNIX_REMOTE),
        ],
    );
}

fn adb_state_hops(config: &mut SmConfig, use_proxy: bool, terminal: bool) {
    if terminal {
        state_hops(
            config,
            &[
                (NOT_CONNECTED, ADB_SHELL, UNIX_LOCAL),
                (UNIX_LOCAL_ROOT, ADB_SHELL, UNIX_LOCAL),
                (ADB_SHELL, UNIX_LOCAL, UNIX_REMOTE),
                (ADB_SHELL, UNIX_LOCAL_ROOT, UNIX_REMOTE),
            ],
        );
        if use_proxy {
            state_hops(
                config,
                &[
                    (UNIX_LOCAL, ADB_SHELL, PROXY_PC),
                    (PROXY_PC, ADB_SHELL, UNIX_REMOTE),
                    (ADB_SHELL, PROXY_PC, UNIX_REMOTE),
                ],
            );
        } else {
            state_hop(config, UNIX_LOCAL, ADB_SHELL, UNIX_REMOTE);
        }
    } else if use_proxy {
        state_hops(
            config,
            &[
                (NOT_CONNECTED, ADB_SHELL, PROXY_PC),
                (PROXY_PC, ADB_SHELL, UNIX_REMOTE),
                (ADB_SHELL, PROXY_PC, UNIX_REMOTE),
            ],
        );
    } else {
        state_hop(config, NOT_CONNECTED, ADB_SHELL, UNIX_REMOTE);
    }
}

/// Effective default configuration for a family, before user hops overlay.
pub fn build_config(family: DeviceFamily, use_proxy: bool, io_kind: IoKind) -> SmConfig {
    let terminal = behaves_like_terminal(io_kind);
    let mut config = SmConfig::default();

    match family {
        DeviceFamily::UnixLocal => {
            config = merge_sm_config(config, unix_local_layer());
        }
        DeviceFamily::ProxyPc => {
            if terminal {
                config = merge_sm_config(config, unix_local_layer());
                config = merge_sm_config(config, proxy_pc_terminal_layer());
            } else {
                config = merge_sm_config(config, proxy_pc_sshshell_layer());
            }
        }
        DeviceFamily::UnixRemote | DeviceFamily::AdbRemote => {
            match (use_proxy, terminal) {
                (true, true) => {
                    config = merge_sm_config(config, unix_local_layer());
                    config = merge_sm_config(config, proxy_pc_terminal_layer());
                    config = merge_sm_config(config, unix_remote_with_proxy_layer());
                    with_proxy_terminal_state_hops(&mut config);
                }
                (true, false) => {
                    config = merge_sm_config(config, proxy_pc_sshshell_layer());
                    config = merge_sm_config(config, unix_remote_with_proxy_layer());
                    with_proxy_sshshell_state_hops(&mut config);
                }
                (false, true) => {
                    config = merge_sm_config(config, unix_local_layer());
                    config = merge_sm_config(config, unix_remote_without_proxy_layer());
                    without_proxy_terminal_state_hops(&mut config);
                }
                (false, false) => {
                    config = merge_sm_config(config, unix_remote_sshshell_layer());
                    without_proxy_sshshell_state_hops(&mut config);
                }
            }
            if family == DeviceFamily::AdbRemote {
                config = merge_sm_config(config, adb_layer());
                adb_state_hops(&mut config, use_proxy, terminal);
            }
        }
    }
    config
}

/// Align the prompt expected when dropping back into UNIX_REMOTE (from root
/// or from the adb shell) with the prompt of the edge that first enters it,
/// so every edge landing in the state agrees.
pub fn fixup_remote_prompts(config: &mut SmConfig, use_proxy: bool, io_kind: IoKind) {
    let source_state = if use_proxy {
        PROXY_PC
    } else if behaves_like_terminal(io_kind) {
        UNIX_LOCAL
    } else {
        return;
    };
    let Some(prompt) = config
        .connection_hops
        .get(source_state)
        .and_then(|edges| edges.get(UNIX_REMOTE))
        .and_then(|spec| spec.expected_prompt())
        .map(str::to_string)
    else {
        return;
    };
    for from in [UNIX_REMOTE_ROOT, ADB_SHELL] {
        if let Some(spec) = config
            .connection_hops
            .get_mut(from)
            .and_then(|edges| edges.get_mut(UNIX_REMOTE))
        {
            spec.command_params
                .insert("expected_prompt".to_string(), prompt.clone().into());
        }
    }
}
