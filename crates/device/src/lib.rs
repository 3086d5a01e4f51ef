// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Devices: per-connection shell-state machines.
//!
//! A device ties one moler connection, its raw io, and a merged state
//! machine together, tracks which shell context the connection is in, and
//! mechanically drives it between states: `goto_state` follows the hop
//! table one edge at a time, running the configured command for each edge
//! through the device's runner. Traversal is sequential per device;
//! different devices move independently.

pub mod commands;
pub mod factory;
pub mod families;
pub mod merge;
pub mod sm;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use connection::io::{IoKind, RemoteIo};
use connection::{ConnectionError, MolerConnection};
use observer::command::Command;
use observer::runner::Runner;
use observer::ObserverError;
use thiserror::Error;
use tracing::{debug, info};

use crate::families::{DeviceFamily, NOT_CONNECTED};
use crate::sm::{ParamMap, StateMachine, TransitionAction};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown state '{0}'")]
    UnknownState(String),

    #[error("no route from '{from}' to '{target}'")]
    NoHop { from: String, target: String },

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    /// A transition command failed; the device stays in the last good
    /// state.
    #[error("transition failed: {0}")]
    Transition(#[from] ObserverError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

pub struct Device {
    name: String,
    family: DeviceFamily,
    use_proxy: bool,
    connection: Arc<MolerConnection>,
    io: Arc<dyn RemoteIo>,
    sm: StateMachine,
    runner: Runner,
    current_state: Mutex<String>,
    traversal: tokio::sync::Mutex<()>,
    removed: AtomicBool,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("use_proxy", &self.use_proxy)
            .finish_non_exhaustive()
    }
}

impl Device {
    pub(crate) fn new(
        name: String,
        family: DeviceFamily,
        use_proxy: bool,
        connection: Arc<MolerConnection>,
        io: Arc<dyn RemoteIo>,
        sm: StateMachine,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            family,
            use_proxy,
            connection,
            io,
            sm,
            runner: Runner::new(),
            current_state: Mutex::new(NOT_CONNECTED.to_string()),
            traversal: tokio::sync::Mutex::new(()),
            removed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn use_proxy(&self) -> bool {
        self.use_proxy
    }

    pub fn connection(&self) -> &Arc<MolerConnection> {
        &self.connection
    }

    pub fn io_kind(&self) -> IoKind {
        self.io.kind()
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.sm
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn current_state(&self) -> String {
        self.current_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| NOT_CONNECTED.to_string())
    }

    /// Drive the connection to `target`, one hop at a time. A failing
    /// transition stops the journey and leaves the device in the last
    /// successfully entered state; retrying is safe.
    pub async fn goto_state(&self, target: &str) -> Result<(), DeviceError> {
        if self.is_removed() {
            return Err(DeviceError::Config(format!(
                "device '{}' was removed",
                self.name
            )));
        }
        if !self.sm.contains_state(target) {
            return Err(DeviceError::UnknownState(target.to_string()));
        }

        let _guard = self.traversal.lock().await;
        loop {
            let current = self.current_state();
            if current == target {
                return Ok(());
            }
            let next = self.sm.next_hop(&current, target)?;
            debug!(
                "device '{}': {} -> {} (towards {})",
                self.name, current, next, target
            );
            self.step(&current, &next).await?;
            if let Ok(mut state) = self.current_state.lock() {
                *state = next.clone();
            }
            info!("device '{}' entered state {}", self.name, next);
        }
    }

    async fn step(&self, from: &str, next: &str) -> Result<(), DeviceError> {
        match self.sm.action(from, next)? {
            TransitionAction::OpenConnection => {
                self.io.open().await?;
                Ok(())
            }
            TransitionAction::CloseConnection => {
                self.io.close().await;
                Ok(())
            }
            TransitionAction::ExecuteCommand => {
                let spec = self.sm.hop_spec(from, next)?;
                for required in &spec.required_command_params {
                    if !spec.command_params.contains_key(required) {
                        return Err(DeviceError::Config(format!(
                            "transition {from} -> {next} is missing required command parameter '{required}'"
                        )));
                    }
                }
                let kind = spec.execute_command.ok_or_else(|| {
                    DeviceError::Config(format!(
                        "transition {from} -> {next} names no command to execute"
                    ))
                })?;
                let command =
                    commands::build_transition_command(kind, &spec.command_params, &self.connection)?;
                command.run(&self.runner).await?;
                Ok(())
            }
        }
    }

    /// Commands legal in the device's current state.
    pub fn command_names(&self) -> &'static [&'static str] {
        commands::command_names_for_state(&self.current_state())
    }

    /// Build a command by package name, validated against the current
    /// state's package.
    pub fn create_command(
        &self,
        name: &str,
        params: &ParamMap,
    ) -> Result<Arc<Command>, DeviceError> {
        let state = self.current_state();
        if !commands::command_names_for_state(&state).contains(&name) {
            return Err(DeviceError::Config(format!(
                "command '{name}' is not available in state {state}"
            )));
        }
        commands::build_named_command(name, params, &self.connection)
    }

    /// Return to NOT_CONNECTED, shut the runner down and release the
    /// device. A removed device cannot be driven again.
    pub async fn remove(&self) -> Result<(), DeviceError> {
        if self.removed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.goto_state(NOT_CONNECTED).await?;
        self.removed.store(true, Ordering::SeqCst);
        self.runner.shutdown();
        self.io.close().await;
        info!("device '{}' removed", self.name);
        Ok(())
    }
}
