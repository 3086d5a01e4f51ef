// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Connection-type registry.
//!
//! Maps the io-type names used in configuration documents to concrete io
//! constructors, with one default variant per io type. A process-wide
//! instance backs the device factory; tests can use their own instances or
//! reset the global one between cases.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;

use crate::io::memory::MemoryIo;
use crate::io::tcp::TcpIo;
use crate::io::RemoteIo;
use crate::{ConnectionError, MolerConnection};

/// Raw constructor parameters from a `CONNECTION_DESC` section
/// (host, port, username, ...).
pub type IoParams = BTreeMap<String, String>;

pub type IoConstructor = Arc<
    dyn Fn(Arc<MolerConnection>, &IoParams) -> Result<Arc<dyn RemoteIo>, ConnectionError>
        + Send
        + Sync,
>;

pub struct ConnectionRegistry {
    default_variants: HashMap<String, String>,
    constructors: HashMap<(String, String), IoConstructor>,
}

impl ConnectionRegistry {
    /// An empty registry with nothing registered.
    pub fn new() -> Self {
        Self {
            default_variants: HashMap::new(),
            constructors: HashMap::new(),
        }
    }

    /// A registry with the built-in ios registered under the "tokio"
    /// variant: `tcp` and `memory`. `terminal` and `sshshell` are known
    /// io-type names but their transports are plugins and must be
    /// registered by the embedding application.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("tcp", "tokio", |connection, params| {
            let host = params.get("host").map(String::as_str).unwrap_or("127.0.0.1");
            let port = params
                .get("port")
                .ok_or_else(|| ConnectionError::Io("tcp io needs a 'port' parameter".into()))?;
            Ok(TcpIo::new(connection, format!("{host}:{port}")) as Arc<dyn RemoteIo>)
        });
        registry.set_default_variant("tcp", "tokio");
        registry.register("memory", "tokio", |connection, _params| {
            Ok(MemoryIo::new(connection) as Arc<dyn RemoteIo>)
        });
        registry.set_default_variant("memory", "tokio");
        registry
    }

    pub fn register(
        &mut self,
        io_type: &str,
        variant: &str,
        constructor: impl Fn(Arc<MolerConnection>, &IoParams) -> Result<Arc<dyn RemoteIo>, ConnectionError>
            + Send
            + Sync
            + 'static,
    ) {
        debug!("registering io constructor {}:{}", io_type, variant);
        self.constructors
            .insert((io_type.to_string(), variant.to_string()), Arc::new(constructor));
    }

    pub fn set_default_variant(&mut self, io_type: &str, variant: &str) {
        self.default_variants
            .insert(io_type.to_string(), variant.to_string());
    }

    pub fn default_variant(&self, io_type: &str) -> Option<&str> {
        self.default_variants.get(io_type).map(String::as_str)
    }

    /// Build an io of the given type, using the explicit variant when given
    /// and the registered default otherwise.
    pub fn build(
        &self,
        io_type: &str,
        variant: Option<&str>,
        connection: Arc<MolerConnection>,
        params: &IoParams,
    ) -> Result<Arc<dyn RemoteIo>, ConnectionError> {
        let variant = variant
            .or_else(|| self.default_variant(io_type))
            .unwrap_or("tokio")
            .to_string();
        let constructor = self
            .constructors
            .get(&(io_type.to_string(), variant.clone()))
            .ok_or(ConnectionError::UnknownIoType {
                io_type: io_type.to_string(),
                variant,
            })?;
        constructor(connection, params)
    }

    pub fn clear(&mut self) {
        self.default_variants.clear();
        self.constructors.clear();
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

static GLOBAL: OnceLock<Mutex<ConnectionRegistry>> = OnceLock::new();

/// The process-wide registry, created with the built-in defaults on first
/// use.
pub fn global() -> &'static Mutex<ConnectionRegistry> {
    GLOBAL.get_or_init(|| Mutex::new(ConnectionRegistry::with_defaults()))
}

/// Reset the process-wide registry back to the built-in defaults.
pub fn reset_global() {
    if let Ok(mut registry) = global().lock() {
        *registry = ConnectionRegistry::with_defaults();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IoKind;

    #[test]
    fn builds_registered_io_with_default_variant() {
        let registry = ConnectionRegistry::with_defaults();
        let conn = MolerConnection::new("reg");
        let io = registry
            .build("memory", None, conn, &IoParams::new())
            .unwrap();
        assert_eq!(io.kind(), IoKind::Memory);
    }

    #[test]
    fn unknown_io_type_is_an_error() {
        let registry = ConnectionRegistry::with_defaults();
        let conn = MolerConnection::new("reg-unknown");
        let err = registry
            .build("sshshell", None, conn, &IoParams::new())
            .unwrap_err();
        assert!(matches!(err, ConnectionError::UnknownIoType { .. }));
    }

    #[test]
    fn explicit_variant_wins_over_default() {
        let mut registry = ConnectionRegistry::with_defaults();
        registry.register("memory", "alt", |connection, _| {
            Ok(MemoryIo::with_kind(connection, IoKind::Terminal) as Arc<dyn RemoteIo>)
        });

        let conn = MolerConnection::new("reg-variant");
        let io = registry
            .build("memory", Some("alt"), conn, &IoParams::new())
            .unwrap();
        assert_eq!(io.kind(), IoKind::Terminal);
    }

    #[test]
    fn tcp_io_requires_a_port() {
        let registry = ConnectionRegistry::with_defaults();
        let conn = MolerConnection::new("reg-tcp");
        assert!(registry.build("tcp", None, conn, &IoParams::new()).is_err());
    }
}
