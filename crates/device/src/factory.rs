// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Device factory: named device definitions, construction, caching.
//!
//! Definitions usually come from the configuration document; callers ask
//! for devices by name and may override the initial state, the connection
//! hops, or the connection description per call. A process-wide factory
//! instance exists for application code; tests use local instances or
//! reset the global one.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use connection::io::{IoKind, RemoteIo};
use connection::registry::IoParams;
use connection::MolerConnection;
use tracing::{debug, info};

use crate::families::{
    behaves_like_terminal, DeviceFamily, PROXY_PC, UNIX_LOCAL, UNIX_LOCAL_ROOT,
};
use crate::merge::merge_hops;
use crate::sm::{HopSpecTable, StateMachine};
use crate::{families, Device, DeviceError};

/// Raw-io selection for a device (`CONNECTION_DESC` in the configuration).
#[derive(Debug, Clone, Default)]
pub struct ConnectionDesc {
    pub io_type: String,
    pub variant: Option<String>,
    pub params: IoParams,
}

/// Named device definition (`DEVICES` entry in the configuration).
#[derive(Debug, Clone)]
pub struct DeviceDef {
    pub device_class: DeviceFamily,
    pub initial_state: Option<String>,
    pub connection_desc: Option<ConnectionDesc>,
    pub connection_hops: Option<HopSpecTable>,
}

/// Per-call overrides for `get_device`.
#[derive(Default)]
pub struct DeviceOverrides {
    pub initial_state: Option<String>,
    pub connection_hops: Option<HopSpecTable>,
    pub connection_desc: Option<ConnectionDesc>,
    /// Pre-built connection and io pair, bypassing the connection-type
    /// registry (simulated shells, embedded transports).
    pub attach: Option<(Arc<MolerConnection>, Arc<dyn RemoteIo>)>,
}

pub struct DeviceFactory {
    defs: HashMap<String, DeviceDef>,
    devices: HashMap<String, Arc<Device>>,
}

impl DeviceFactory {
    pub fn new() -> Self {
        Self {
            defs: HashMap::new(),
            devices: HashMap::new(),
        }
    }

    /// Register or replace a named device definition.
    pub fn configure(&mut self, name: impl Into<String>, def: DeviceDef) {
        let name = name.into();
        debug!("device factory: configured '{}'", name);
        self.defs.insert(name, def);
    }

    pub fn device_names(&self) -> Vec<String> {
        self.defs.keys().cloned().collect()
    }

    /// Drop all definitions and cached devices.
    pub fn clear(&mut self) {
        self.defs.clear();
        self.devices.clear();
    }

    /// Get (or build) the named device and drive it to its initial state.
    pub async fn get_device(
        &mut self,
        name: &str,
        overrides: DeviceOverrides,
    ) -> Result<Arc<Device>, DeviceError> {
        if let Some(device) = self.devices.get(name) {
            if !device.is_removed() {
                return Ok(device.clone());
            }
            self.devices.remove(name);
        }

        let def = self
            .defs
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownDevice(name.to_string()))?;
        let device = build_device(name, def, overrides).await?;
        self.devices.insert(name.to_string(), device.clone());
        Ok(device)
    }
}

impl Default for DeviceFactory {
    fn default() -> Self {
        Self::new()
    }
}

async fn build_device(
    name: &str,
    def: DeviceDef,
    overrides: DeviceOverrides,
) -> Result<Arc<Device>, DeviceError> {
    let family = def.device_class;

    let (connection, io) = match overrides.attach {
        Some((connection, io)) => (connection, io),
        None => {
            let desc = overrides
                .connection_desc
                .or(def.connection_desc)
                .unwrap_or_else(|| ConnectionDesc {
                    io_type: "terminal".to_string(),
                    ..ConnectionDesc::default()
                });
            let connection = MolerConnection::new(name);
            let registry = connection::registry::global()
                .lock()
                .map_err(|_| DeviceError::Config("connection registry lock poisoned".into()))?;
            let io = registry.build(
                &desc.io_type,
                desc.variant.as_deref(),
                connection.clone(),
                &desc.params,
            )?;
            (connection, io)
        }
    };
    let io_kind = io.kind();

    let mut hops_overlay = def.connection_hops.unwrap_or_default();
    if let Some(user_hops) = overrides.connection_hops {
        merge_hops(&mut hops_overlay, user_hops);
    }

    let use_proxy = family == DeviceFamily::ProxyPc
        || overrides.initial_state.as_deref() == Some(PROXY_PC)
        || hops_mention_proxy(&hops_overlay);

    let initial_state = overrides
        .initial_state
        .or(def.initial_state)
        .unwrap_or_else(|| family.default_initial_state().to_string());

    validate_states_for_io(name, family, &initial_state, io_kind)?;

    let mut config = families::build_config(family, use_proxy, io_kind);
    merge_hops(&mut config.connection_hops, hops_overlay);
    families::fixup_remote_prompts(&mut config, use_proxy, io_kind);
    let sm = StateMachine::new(config)?;

    if !sm.contains_state(&initial_state) {
        return Err(DeviceError::Config(format!(
            "device '{name}' has no state '{initial_state}'"
        )));
    }

    let device = Device::new(
        name.to_string(),
        family,
        use_proxy,
        connection,
        io,
        sm,
    );
    info!(
        "device factory: built '{}' ({:?}, io {}), heading for {}",
        name, family, io_kind, initial_state
    );
    device.goto_state(&initial_state).await?;
    Ok(device)
}

fn hops_mention_proxy(hops: &HopSpecTable) -> bool {
    hops.iter()
        .any(|(from, edges)| from == PROXY_PC || edges.contains_key(PROXY_PC))
}

/// Remote-access ios open straight into a remote shell, so unix-local
/// states do not exist on such devices. The original resolves the hop-table
/// route through UNIX_LOCAL by rejecting the initial state up front rather
/// than silently substituting another one.
fn validate_states_for_io(
    name: &str,
    family: DeviceFamily,
    initial_state: &str,
    io_kind: IoKind,
) -> Result<(), DeviceError> {
    let local_state_requested = initial_state == UNIX_LOCAL || initial_state == UNIX_LOCAL_ROOT;
    if (local_state_requested || family == DeviceFamily::UnixLocal)
        && !behaves_like_terminal(io_kind)
    {
        return Err(DeviceError::Config(format!(
            "device '{name}' has no UNIX_LOCAL/UNIX_LOCAL_ROOT states since it uses following io: {io_kind}; unix-local states require a terminal io type"
        )));
    }
    Ok(())
}

static GLOBAL: OnceLock<tokio::sync::Mutex<DeviceFactory>> = OnceLock::new();

/// The process-wide factory.
pub fn global() -> &'static tokio::sync::Mutex<DeviceFactory> {
    GLOBAL.get_or_init(|| tokio::sync::Mutex::new(DeviceFactory::new()))
}

pub async fn get_device(name: &str, overrides: DeviceOverrides) -> Result<Arc<Device>, DeviceError> {
    global().lock().await.get_device(name, overrides).await
}

pub async fn configure_device(name: impl Into<String>, def: DeviceDef) {
    global().lock().await.configure(name, def);
}

pub async fn clear_global() {
    global().lock().await.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::families::{ADB_SHELL, NOT_CONNECTED, UNIX_REMOTE, UNIX_REMOTE_ROOT};
    use crate::sm::HopSpec;
    use connection::io::memory::MemoryIo;
    use serde_json::json;

    fn hops(entries: &[(&str, &str, HopSpec)]) -> HopSpecTable {
        let mut table = HopSpecTable::new();
        for (from, to, spec) in entries {
            table
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string(), spec.clone());
        }
        table
    }

    fn unix_remote_def() -> DeviceDef {
        DeviceDef {
            device_class: DeviceFamily::UnixRemote,
            initial_state: None,
            connection_desc: None,
            connection_hops: None,
        }
    }

    /// Simulated shell: answers every ssh/su/exit with the right echo and
    /// prompt for the proxy -> remote -> root journey.
    fn scripted_terminal(conn: &Arc<MolerConnection>) -> Arc<MemoryIo> {
        let io = MemoryIo::with_kind(conn.clone(), IoKind::Terminal);
        io.respond_with(|sent| {
            let sent = sent.trim_end();
            if sent.starts_with("ssh -l proxy_user") {
                Some(format!("{sent}\nproxy_pc# "))
            } else if sent.starts_with("ssh -l remote_user") {
                Some(format!("{sent}\nremote$ "))
            } else if sent == "su" {
                Some("su\nremote_root# ".to_string())
            } else if sent == "exit" {
                Some("exit\nproxy_pc# ".to_string())
            } else {
                None
            }
        });
        io
    }

    fn proxy_journey_hops() -> HopSpecTable {
        hops(&[
            (
                UNIX_LOCAL,
                PROXY_PC,
                HopSpec::default()
                    .param("host", "proxy_host")
                    .param("login", "proxy_user")
                    .param("password", "pp")
                    .param("expected_prompt", "proxy_pc#"),
            ),
            (
                PROXY_PC,
                UNIX_REMOTE,
                HopSpec::default()
                    .param("host", "remote_host")
                    .param("login", "remote_user")
                    .param("password", "rp")
                    .param("expected_prompt", r"remote\$"),
            ),
            (
                UNIX_REMOTE,
                UNIX_REMOTE_ROOT,
                HopSpec::default()
                    .param("password", "root_pw")
                    .param("expected_prompt", "remote_root#"),
            ),
        ])
    }

    #[tokio::test]
    async fn traverses_local_proxy_remote_root_in_order() {
        let mut factory = DeviceFactory::new();
        factory.configure("UX_REMOTE", unix_remote_def());

        let conn = MolerConnection::new("UX_REMOTE");
        let io = scripted_terminal(&conn);
        let device = factory
            .get_device(
                "UX_REMOTE",
                DeviceOverrides {
                    initial_state: Some(UNIX_LOCAL.to_string()),
                    connection_hops: Some(proxy_journey_hops()),
                    attach: Some((conn, io.clone())),
                    ..DeviceOverrides::default()
                },
            )
            .await
            .unwrap();
        assert!(device.use_proxy());
        assert_eq!(device.current_state(), UNIX_LOCAL);

        device.goto_state(UNIX_REMOTE_ROOT).await.unwrap();
        assert_eq!(device.current_state(), UNIX_REMOTE_ROOT);

        let sent = io.sent();
        assert_eq!(
            sent,
            vec![
                "ssh -l proxy_user proxy_host\n",
                "ssh -l remote_user remote_host\n",
                "su\n",
            ]
        );
    }

    #[tokio::test]
    async fn goto_current_state_is_a_no_op() {
        let mut factory = DeviceFactory::new();
        factory.configure("UX_REMOTE", unix_remote_def());

        let conn = MolerConnection::new("UX_REMOTE-noop");
        let io = scripted_terminal(&conn);
        let device = factory
            .get_device(
                "UX_REMOTE",
                DeviceOverrides {
                    initial_state: Some(UNIX_LOCAL.to_string()),
                    connection_hops: Some(proxy_journey_hops()),
                    attach: Some((conn, io.clone())),
                    ..DeviceOverrides::default()
                },
            )
            .await
            .unwrap();

        device.goto_state(UNIX_LOCAL).await.unwrap();
        assert!(io.sent().is_empty());
    }

    #[tokio::test]
    async fn round_trip_returns_to_the_first_state() {
        let mut factory = DeviceFactory::new();
        factory.configure("UX_REMOTE", unix_remote_def());

        let conn = MolerConnection::new("UX_REMOTE-roundtrip");
        let io = scripted_terminal(&conn);
        let mut journey = proxy_journey_hops();
        merge_hops(
            &mut journey,
            hops(&[(
                UNIX_REMOTE,
                PROXY_PC,
                HopSpec::default().param("expected_prompt", "proxy_pc#"),
            )]),
        );
        let device = factory
            .get_device(
                "UX_REMOTE",
                DeviceOverrides {
                    initial_state: Some(PROXY_PC.to_string()),
                    connection_hops: Some(journey),
                    attach: Some((conn, io.clone())),
                    ..DeviceOverrides::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(device.current_state(), PROXY_PC);

        device.goto_state(UNIX_REMOTE).await.unwrap();
        device.goto_state(PROXY_PC).await.unwrap();
        assert_eq!(device.current_state(), PROXY_PC);
    }

    #[tokio::test]
    async fn missing_required_parameter_fails_before_any_io() {
        let mut factory = DeviceFactory::new();
        factory.configure("UX_REMOTE", unix_remote_def());

        let conn = MolerConnection::new("UX_REMOTE-missing");
        let io = scripted_terminal(&conn);
        // No ssh parameters supplied at all.
        let device = factory
            .get_device(
                "UX_REMOTE",
                DeviceOverrides {
                    initial_state: Some(UNIX_LOCAL.to_string()),
                    connection_hops: Some(hops(&[(
                        UNIX_LOCAL,
                        PROXY_PC,
                        HopSpec::default().param("expected_prompt", "proxy_pc#"),
                    )])),
                    attach: Some((conn, io.clone())),
                    ..DeviceOverrides::default()
                },
            )
            .await
            .unwrap();

        let err = device.goto_state(PROXY_PC).await.unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));
        assert_eq!(device.current_state(), UNIX_LOCAL);
        assert!(io.sent().is_empty());
    }

    #[tokio::test]
    async fn sshshell_io_refuses_unix_local_states() {
        let mut factory = DeviceFactory::new();
        factory.configure("UX_REMOTE", unix_remote_def());

        let conn = MolerConnection::new("UX_REMOTE-sshshell");
        let io = MemoryIo::with_kind(conn.clone(), IoKind::SshShell);
        let err = factory
            .get_device(
                "UX_REMOTE",
                DeviceOverrides {
                    initial_state: Some(UNIX_LOCAL.to_string()),
                    attach: Some((conn, io)),
                    ..DeviceOverrides::default()
                },
            )
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("has no UNIX_LOCAL/UNIX_LOCAL_ROOT states"));
        assert!(message.contains("sshshell"));
        assert!(message.contains("unix-local states require a terminal io type"));
    }

    #[tokio::test]
    async fn sshshell_proxy_device_opens_straight_into_proxy() {
        let mut factory = DeviceFactory::new();
        factory.configure(
            "PROXY",
            DeviceDef {
                device_class: DeviceFamily::ProxyPc,
                initial_state: None,
                connection_desc: None,
                connection_hops: None,
            },
        );

        let conn = MolerConnection::new("PROXY");
        let io = MemoryIo::with_kind(conn.clone(), IoKind::SshShell);
        let device = factory
            .get_device(
                "PROXY",
                DeviceOverrides {
                    attach: Some((conn, io)),
                    ..DeviceOverrides::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(device.current_state(), PROXY_PC);

        device.goto_state(NOT_CONNECTED).await.unwrap();
        assert_eq!(device.current_state(), NOT_CONNECTED);
        device.remove().await.unwrap();
        assert!(device.is_removed());
    }

    #[tokio::test]
    async fn removed_devices_are_rebuilt_on_next_request() {
        let mut factory = DeviceFactory::new();
        factory.configure(
            "PROXY",
            DeviceDef {
                device_class: DeviceFamily::ProxyPc,
                initial_state: None,
                connection_desc: None,
                connection_hops: None,
            },
        );

        let conn = MolerConnection::new("PROXY-1");
        let io = MemoryIo::with_kind(conn.clone(), IoKind::SshShell);
        let first = factory
            .get_device(
                "PROXY",
                DeviceOverrides {
                    attach: Some((conn, io)),
                    ..DeviceOverrides::default()
                },
            )
            .await
            .unwrap();
        first.remove().await.unwrap();

        let conn = MolerConnection::new("PROXY-2");
        let io = MemoryIo::with_kind(conn.clone(), IoKind::SshShell);
        let second = factory
            .get_device(
                "PROXY",
                DeviceOverrides {
                    attach: Some((conn, io)),
                    ..DeviceOverrides::default()
                },
            )
            .await
            .unwrap();
        assert!(!second.is_removed());
        assert_eq!(second.current_state(), PROXY_PC);
    }

    #[tokio::test]
    async fn adb_device_reaches_the_android_shell() {
        let mut factory = DeviceFactory::new();
        factory.configure(
            "ADB",
            DeviceDef {
                device_class: DeviceFamily::AdbRemote,
                initial_state: None,
                connection_desc: None,
                connection_hops: None,
            },
        );

        let conn = MolerConnection::new("ADB");
        let io = MemoryIo::with_kind(conn.clone(), IoKind::SshShell);
        io.respond_with(|sent| {
            let sent = sent.trim_end();
            (sent == "adb -s 1234567890 shell").then(|| format!("{sent}\nshell@android:/ $ "))
        });
        let device = factory
            .get_device(
                "ADB",
                DeviceOverrides {
                    initial_state: Some(ADB_SHELL.to_string()),
                    connection_hops: Some(hops(&[(
                        UNIX_REMOTE,
                        ADB_SHELL,
                        HopSpec::default().param("serial_number", json!("1234567890")),
                    )])),
                    attach: Some((conn, io)),
                    ..DeviceOverrides::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(device.current_state(), ADB_SHELL);
        assert_eq!(device.command_names(), &["exit", "pwd", "ps"]);

        // Per-state package lookup: pwd is legal here, ssh is not.
        assert!(device
            .create_command("pwd", &crate::sm::ParamMap::new())
            .is_ok());
        assert!(matches!(
            device.create_command("ssh", &crate::sm::ParamMap::new()),
            Err(DeviceError::Config(_))
        ));
    }
}
