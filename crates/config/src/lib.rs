// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Configuration loading.
//!
//! Parses the hierarchical device document (TOML with `DEVICES` and
//! `CONNECTION_TYPES` sections) and feeds it into the device factory and
//! the connection-type registry. The core consumes these definitions; it
//! does not define the document format.
//!
//! ```toml
//! [DEVICES.UX_REMOTE]
//! DEVICE_CLASS = "unix_remote"
//!
//! [DEVICES.UX_REMOTE.CONNECTION_DESC]
//! io_type = "sshshell"
//! host = "localhost"
//! username = "molerssh"
//! password = "moler_password"
//!
//! [DEVICES.UX_REMOTE.CONNECTION_HOPS.UNIX_REMOTE.UNIX_REMOTE_ROOT.command_params]
//! password = "root_passwd"
//! expected_prompt = 'root@\S+#'
//!
//! [CONNECTION_TYPES]
//! tcp = "tokio"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use connection::registry::{ConnectionRegistry, IoParams};
use device::factory::{ConnectionDesc, DeviceDef, DeviceFactory};
use device::families::DeviceFamily;
use device::sm::HopSpecTable;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("device '{device}' names unknown DEVICE_CLASS '{class}'")]
    UnknownDeviceClass { device: String, class: String },
}

/// The whole configuration document.
#[derive(Debug, Deserialize)]
pub struct MolerConfig {
    #[serde(rename = "DEVICES", default)]
    pub devices: BTreeMap<String, DeviceEntry>,

    /// Default io variant per io-type name.
    #[serde(rename = "CONNECTION_TYPES", default)]
    pub connection_types: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceEntry {
    #[serde(rename = "DEVICE_CLASS")]
    pub device_class: String,

    #[serde(rename = "INITIAL_STATE", default)]
    pub initial_state: Option<String>,

    #[serde(rename = "CONNECTION_DESC", default)]
    pub connection_desc: Option<ConnectionDescEntry>,

    #[serde(rename = "CONNECTION_HOPS", default)]
    pub connection_hops: Option<HopSpecTable>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionDescEntry {
    pub io_type: String,

    #[serde(default)]
    pub variant: Option<String>,

    /// Remaining keys are raw io constructor parameters (host, port,
    /// username, ...).
    #[serde(flatten)]
    pub params: BTreeMap<String, toml::Value>,
}

impl ConnectionDescEntry {
    fn into_desc(self) -> ConnectionDesc {
        let mut params = IoParams::new();
        for (name, value) in self.params {
            let rendered = match value {
                toml::Value::String(s) => s,
                other => other.to_string(),
            };
            params.insert(name, rendered);
        }
        ConnectionDesc {
            io_type: self.io_type,
            variant: self.variant,
            params,
        }
    }
}

pub fn load_str(text: &str) -> Result<MolerConfig, ConfigError> {
    Ok(toml::from_str(text)?)
}

pub fn load_path(path: impl AsRef<Path>) -> Result<MolerConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    load_str(&text)
}

/// Install the document's definitions into a factory and registry.
pub fn apply(
    config: MolerConfig,
    factory: &mut DeviceFactory,
    registry: &mut ConnectionRegistry,
) -> Result<(), ConfigError> {
    for (io_type, variant) in &config.connection_types {
        registry.set_default_variant(io_type, variant);
    }
    for (name, entry) in config.devices {
        let family = DeviceFamily::parse(&entry.device_class).ok_or_else(|| {
            ConfigError::UnknownDeviceClass {
                device: name.clone(),
                class: entry.device_class.clone(),
            }
        })?;
        let def = DeviceDef {
            device_class: family,
            initial_state: entry.initial_state,
            connection_desc: entry.connection_desc.map(ConnectionDescEntry::into_desc),
            connection_hops: entry.connection_hops,
        };
        info!("configured device '{}' as {:?}", name, family);
        factory.configure(name, def);
    }
    Ok(())
}

/// Parse a document and install it into the process-wide factory and
/// registry.
pub async fn load_into_global(text: &str) -> Result<(), ConfigError> {
    let config = load_str(text)?;
    let mut factory = device::factory::global().lock().await;
    let mut registry = connection::registry::global()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    apply(config, &mut factory, &mut registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use device::families::{UNIX_REMOTE, UNIX_REMOTE_ROOT};

    const UNIX_REMOTE_CONFIG: &str = r#"
[DEVICES.UX_REMOTE]
DEVICE_CLASS = "unix_remote"

[DEVICES.UX_REMOTE.CONNECTION_DESC]
io_type = "sshshell"
host = "localhost"
port = 22
username = "molerssh"
password = "moler_password"

[DEVICES.UX_REMOTE.CONNECTION_HOPS.UNIX_REMOTE.UNIX_REMOTE_ROOT.command_params]
password = "root_passwd"
expected_prompt = 'root@\S+#'

[CONNECTION_TYPES]
tcp = "tokio"
memory = "tokio"
"#;

    #[test]
    fn parses_devices_hops_and_connection_types() {
        let config = load_str(UNIX_REMOTE_CONFIG).unwrap();
        assert_eq!(config.connection_types["tcp"], "tokio");

        let entry = &config.devices["UX_REMOTE"];
        assert_eq!(entry.device_class, "unix_remote");
        let hops = entry.connection_hops.as_ref().unwrap();
        let spec = &hops[UNIX_REMOTE][UNIX_REMOTE_ROOT];
        assert_eq!(spec.expected_prompt(), Some(r"root@\S+#"));
        assert_eq!(
            spec.command_params["password"],
            serde_json::json!("root_passwd")
        );
    }

    #[test]
    fn applies_into_factory_and_registry() {
        let config = load_str(UNIX_REMOTE_CONFIG).unwrap();
        let mut factory = DeviceFactory::new();
        let mut registry = ConnectionRegistry::with_defaults();
        apply(config, &mut factory, &mut registry).unwrap();

        assert_eq!(factory.device_names(), vec!["UX_REMOTE".to_string()]);
        assert_eq!(registry.default_variant("memory"), Some("tokio"));
    }

    #[test]
    fn desc_params_keep_non_string_values_rendered() {
        let config = load_str(UNIX_REMOTE_CONFIG).unwrap();
        let entry = config.devices.into_iter().next().unwrap().1;
        let desc = entry.connection_desc.unwrap().into_desc();
        assert_eq!(desc.io_type, "sshshell");
        assert_eq!(desc.params["host"], "localhost");
        assert_eq!(desc.params["port"], "22");
    }

    #[test]
    fn unknown_device_class_is_rejected() {
        let config = load_str("[DEVICES.X]\nDEVICE_CLASS = \"windows_remote\"\n").unwrap();
        let mut factory = DeviceFactory::new();
        let mut registry = ConnectionRegistry::new();
        let err = apply(config, &mut factory, &mut registry).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDeviceClass { .. }));
    }
}
