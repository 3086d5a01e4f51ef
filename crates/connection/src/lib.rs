// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Observable text connections.
//!
//! A [`MolerConnection`] wraps one raw bidirectional connection and turns it
//! into an observable text stream: inbound bytes are decoded once and fanned
//! out to every currently subscribed consumer, outbound text goes through a
//! send handle installed by the raw io. The raw io itself (tcp, in-memory
//! loopback, or an external plugin) lives in the [`io`] module and only talks
//! to the connection through [`MolerConnection::data_received`] and the
//! outbound channel.

pub mod io;
pub mod registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Errors reported by the connection layer.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// `send` was called with no raw io attached.
    #[error("connection '{0}' has no io attached; cannot send")]
    NotOpen(String),

    /// The underlying raw io failed to open, read or write.
    #[error("io failure: {0}")]
    Io(String),

    /// No constructor registered for the requested io type/variant.
    #[error("no io registered for type '{io_type}' variant '{variant}'")]
    UnknownIoType { io_type: String, variant: String },
}

/// Consumer side of the fan-out.
///
/// Implementors receive every decoded chunk that arrives while they are
/// subscribed, in wire order. Callbacks must be short and non-blocking; a
/// consumer that detects its own failure records it on its result slot
/// rather than propagating it here, so one consumer can never stop delivery
/// to the others.
pub trait StreamSubscriber: Send + Sync {
    fn on_data(&self, chunk: &str, received_at: SystemTime);
}

type Decoder = dyn Fn(&[u8]) -> String + Send + Sync;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// An observable text stream over one raw bidirectional connection.
///
/// The connection outlives open/close cycles of the raw io: subscribers stay
/// subscribed across a reconnect, and the outbound handle is swapped by the
/// io on open/close.
pub struct MolerConnection {
    id: u64,
    name: String,
    decoder: Box<Decoder>,
    subscribers: Mutex<Vec<(u64, Weak<dyn StreamSubscriber>)>>,
    next_subscription: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl MolerConnection {
    /// Create a connection with the default UTF-8 (lossy) decoder.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_decoder(name, |bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Create a connection with a custom bytes→text decoder.
    pub fn with_decoder(
        name: impl Into<String>,
        decoder: impl Fn(&[u8]) -> String + Send + Sync + 'static,
    ) -> Arc<Self> {
        let name = name.into();
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        debug!("created moler connection '{}' (id={})", name, id);
        Arc::new(Self {
            id,
            name,
            decoder: Box::new(decoder),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            outbound: Mutex::new(None),
        })
    }

    /// Process-unique identity of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a subscriber; returns the subscription id used to unsubscribe.
    ///
    /// The reference is non-owning: a dropped subscriber is purged on the
    /// next delivery or subscription change.
    pub fn subscribe(&self, subscriber: Weak<dyn StreamSubscriber>) -> u64 {
        let subscription = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|(_, weak)| weak.strong_count() > 0);
            subs.push((subscription, subscriber));
            trace!(
                "connection '{}': subscribed #{} ({} active)",
                self.name,
                subscription,
                subs.len()
            );
        } else {
            warn!(
                "connection '{}': subscriber set lock poisoned on subscribe",
                self.name
            );
        }
        subscription
    }

    /// Remove a subscription. Unknown ids are a no-op.
    pub fn unsubscribe(&self, subscription: u64) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|(id, weak)| *id != subscription && weak.strong_count() > 0);
            trace!(
                "connection '{}': unsubscribed #{} ({} active)",
                self.name,
                subscription,
                subs.len()
            );
        } else {
            warn!(
                "connection '{}': subscriber set lock poisoned on unsubscribe",
                self.name
            );
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subs| {
                subs.iter()
                    .filter(|(_, weak)| weak.strong_count() > 0)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Entry point for the raw io: decode one inbound chunk and deliver it
    /// to every subscriber present when delivery begins.
    ///
    /// The set is sampled up front, so a subscriber that unsubscribes from
    /// inside its own callback still sees the current chunk but none after
    /// it. When this returns, all sampled subscribers have been notified.
    pub fn data_received(&self, bytes: &[u8], received_at: SystemTime) {
        let text = (self.decoder)(bytes);
        trace!(
            "connection '{}': received {} bytes -> {:?}",
            self.name,
            bytes.len(),
            text
        );

        let targets: Vec<Arc<dyn StreamSubscriber>> = match self.subscribers.lock() {
            Ok(mut subs) => {
                subs.retain(|(_, weak)| weak.strong_count() > 0);
                subs.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
            }
            Err(_) => {
                warn!(
                    "connection '{}': subscriber set lock poisoned on delivery",
                    self.name
                );
                return;
            }
        };

        for target in targets {
            target.on_data(&text, received_at);
        }
    }

    /// Install the outbound handle; called by the raw io when it opens.
    pub fn attach_outbound(&self, tx: mpsc::UnboundedSender<Vec<u8>>) {
        if let Ok(mut outbound) = self.outbound.lock() {
            *outbound = Some(tx);
        }
    }

    /// Drop the outbound handle; called by the raw io when it closes.
    pub fn detach_outbound(&self) {
        if let Ok(mut outbound) = self.outbound.lock() {
            *outbound = None;
        }
    }

    /// Send text towards the remote side through the attached io.
    pub fn send(&self, text: &str) -> Result<(), ConnectionError> {
        self.send_bytes(text.as_bytes().to_vec())
    }

    pub fn send_bytes(&self, bytes: Vec<u8>) -> Result<(), ConnectionError> {
        let outbound = self
            .outbound
            .lock()
            .map_err(|_| ConnectionError::NotOpen(self.name.clone()))?;
        match outbound.as_ref() {
            Some(tx) => tx
                .send(bytes)
                .map_err(|e| ConnectionError::Io(format!("outbound channel closed: {e}"))),
            None => Err(ConnectionError::NotOpen(self.name.clone())),
        }
    }
}

impl std::fmt::Debug for MolerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MolerConnection")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
