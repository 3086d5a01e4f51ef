// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Tcp client io: a reader task feeding the connection and a writer task
//! draining its outbound channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::io::{IoKind, RemoteIo};
use crate::{ConnectionError, MolerConnection};

pub struct TcpIo {
    connection: Arc<MolerConnection>,
    addr: String,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    opened: AtomicBool,
}

impl std::fmt::Debug for TcpIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpIo")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl TcpIo {
    pub fn new(connection: Arc<MolerConnection>, addr: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            connection,
            addr: addr.into(),
            tasks: Mutex::new(Vec::new()),
            opened: AtomicBool::new(false),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait::async_trait]
impl RemoteIo for TcpIo {
    fn kind(&self) -> IoKind {
        IoKind::Tcp
    }

    async fn open(&self) -> Result<(), ConnectionError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            self.opened.store(false, Ordering::SeqCst);
            ConnectionError::Io(format!("connect to {} failed: {e}", self.addr))
        })?;
        debug!(
            "tcp io connected to {} for connection '{}'",
            self.addr,
            self.connection.name()
        );

        let (mut read_half, mut write_half) = stream.into_split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.connection.attach_outbound(tx);

        let reader_conn = self.connection.clone();
        let reader_addr = self.addr.clone();
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        debug!("tcp io: remote {} closed", reader_addr);
                        break;
                    }
                    Ok(n) => reader_conn.data_received(&buf[..n], SystemTime::now()),
                    Err(e) => {
                        warn!("tcp io: read from {} failed: {e}", reader_addr);
                        break;
                    }
                }
            }
        });

        let writer_addr = self.addr.clone();
        let writer = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if let Err(e) = write_half.write_all(&bytes).await {
                    warn!("tcp io: write to {} failed: {e}", writer_addr);
                    break;
                }
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(reader);
            tasks.push(writer);
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.opened.swap(false, Ordering::SeqCst) {
            return;
        }
        self.connection.detach_outbound();
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        debug!(
            "tcp io closed towards {} for connection '{}'",
            self.addr,
            self.connection.name()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StreamSubscriber;
    use std::sync::Weak;
    use std::time::Duration;
    use tokio::net::TcpListener;

    struct Sink {
        chunks: Mutex<Vec<String>>,
    }

    impl StreamSubscriber for Sink {
        fn on_data(&self, chunk: &str, _received_at: SystemTime) {
            self.chunks.lock().unwrap().push(chunk.to_string());
        }
    }

    #[tokio::test]
    async fn round_trips_bytes_with_a_tcp_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Echo server answering a single client.
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });

        let conn = MolerConnection::new("tcp-test");
        let sink = Arc::new(Sink {
            chunks: Mutex::new(Vec::new()),
        });
        conn.subscribe(Arc::downgrade(&sink) as Weak<dyn StreamSubscriber>);

        let io = TcpIo::new(conn.clone(), addr.to_string());
        io.open().await.unwrap();
        conn.send("ping\n").unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.chunks.lock().unwrap().clone(), vec!["ping\n"]);
        io.close().await;
    }

    #[tokio::test]
    async fn connect_failure_surfaces_as_io_error() {
        let conn = MolerConnection::new("tcp-fail");
        // Port 1 is essentially never listening.
        let io = TcpIo::new(conn, "127.0.0.1:1");
        assert!(matches!(io.open().await, Err(ConnectionError::Io(_))));
    }
}
