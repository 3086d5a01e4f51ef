// SPDX-License-Identifier: PolyForm-Shield-1.0

//! In-memory loopback io.
//!
//! Stands in for a live transport during tests and simulations: injected
//! text shows up on the connection as if it arrived from the remote side,
//! and everything the connection sends is captured. A scripted responder can
//! answer sent lines, which is enough to simulate a whole shell dialog
//! (prompts, ssh hops, su) without any real endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::io::{IoKind, RemoteIo};
use crate::{ConnectionError, MolerConnection};

type Responder = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

struct Shared {
    connection: Arc<MolerConnection>,
    sent: Mutex<Vec<String>>,
    responder: Mutex<Option<Responder>>,
}

pub struct MemoryIo {
    shared: Arc<Shared>,
    kind: IoKind,
    open_banner: Mutex<Option<String>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    opened: AtomicBool,
}

impl std::fmt::Debug for MemoryIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIo")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl MemoryIo {
    pub fn new(connection: Arc<MolerConnection>) -> Arc<Self> {
        Self::with_kind(connection, IoKind::Memory)
    }

    /// Loopback io reporting a different transport kind, so device-level
    /// io-kind rules can be exercised against a simulated shell.
    pub fn with_kind(connection: Arc<MolerConnection>, kind: IoKind) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                connection,
                sent: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
            }),
            kind,
            open_banner: Mutex::new(None),
            writer: Mutex::new(None),
            opened: AtomicBool::new(false),
        })
    }

    /// Feed text into the connection as if it arrived from the remote side.
    pub fn inject(&self, text: &str) {
        self.shared
            .connection
            .data_received(text.as_bytes(), SystemTime::now());
    }

    /// Everything sent over the connection since open, one entry per send.
    pub fn sent(&self) -> Vec<String> {
        self.shared
            .sent
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Script the remote side: the callback sees each sent payload and may
    /// return text to inject back.
    pub fn respond_with(&self, responder: impl Fn(&str) -> Option<String> + Send + Sync + 'static) {
        if let Ok(mut slot) = self.shared.responder.lock() {
            *slot = Some(Box::new(responder));
        }
    }

    /// Text injected immediately after a successful open, before anything is
    /// sent (a login banner or the first shell prompt).
    pub fn set_open_banner(&self, banner: impl Into<String>) {
        if let Ok(mut slot) = self.open_banner.lock() {
            *slot = Some(banner.into());
        }
    }
}

#[async_trait::async_trait]
impl RemoteIo for MemoryIo {
    fn kind(&self) -> IoKind {
        self.kind
    }

    async fn open(&self) -> Result<(), ConnectionError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.shared.connection.attach_outbound(tx);

        let shared = self.shared.clone();
        let writer = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                if let Ok(mut sent) = shared.sent.lock() {
                    sent.push(text.clone());
                } else {
                    warn!("memory io: sent log lock poisoned");
                }
                let reply = match shared.responder.lock() {
                    Ok(responder) => responder.as_ref().and_then(|f| f(&text)),
                    Err(_) => None,
                };
                if let Some(reply) = reply {
                    shared
                        .connection
                        .data_received(reply.as_bytes(), SystemTime::now());
                }
            }
        });
        if let Ok(mut slot) = self.writer.lock() {
            *slot = Some(writer);
        }

        debug!(
            "memory io opened for connection '{}'",
            self.shared.connection.name()
        );

        let banner = self
            .open_banner
            .lock()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(banner) = banner {
            self.inject(&banner);
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.opened.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.connection.detach_outbound();
        if let Ok(mut slot) = self.writer.lock() {
            if let Some(writer) = slot.take() {
                writer.abort();
            }
        }
        debug!(
            "memory io closed for connection '{}'",
            self.shared.connection.name()
        );
    }
}
