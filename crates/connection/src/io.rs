// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Raw io plugins.
//!
//! A raw io owns the actual transport. On `open` it installs the outbound
//! handle on its [`MolerConnection`] and starts feeding inbound bytes into
//! [`MolerConnection::data_received`]; on `close` it tears both down. The
//! rest of the system never touches the transport directly.

pub mod memory;
pub mod tcp;

use async_trait::async_trait;

use crate::ConnectionError;

/// Transport kind of a raw io. Device families use this to decide which
/// shell states a device can legally have (a `sshshell` io opens straight
/// into a remote shell and has no local-shell states, a `terminal` io starts
/// in the local shell).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Memory,
    Tcp,
    Terminal,
    SshShell,
}

impl IoKind {
    /// Parse the io-type name used in configuration documents.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "memory" => Some(Self::Memory),
            "tcp" => Some(Self::Tcp),
            "terminal" => Some(Self::Terminal),
            "sshshell" => Some(Self::SshShell),
            _ => None,
        }
    }
}

impl std::fmt::Display for IoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Memory => "memory",
            Self::Tcp => "tcp",
            Self::Terminal => "terminal",
            Self::SshShell => "sshshell",
        };
        f.write_str(name)
    }
}

/// A scoped transport resource under a moler connection.
///
/// `open` must be called before any send reaches the wire; `close` must be
/// safe to call on every exit path, including repeatedly.
#[async_trait]
pub trait RemoteIo: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> IoKind;

    async fn open(&self) -> Result<(), ConnectionError>;

    async fn close(&self);
}
