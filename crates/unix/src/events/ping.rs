// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Detectors over live `ping` output.
//!
//! Both detectors resolve with the wall-clock timestamp of the line that
//! triggered them, so callers can reconstruct when the network actually
//! changed state rather than when they got around to asking.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use connection::MolerConnection;
use observer::event::{Event, EventBehavior};
use serde_json::{json, Value};
use tracing::info;

fn epoch_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Resolves when the pinged address stops answering
/// (`ping: sendmsg: Network is unreachable`).
pub struct NetworkDownDetector {
    net_ip: String,
}

impl NetworkDownDetector {
    pub fn new(net_ip: impl Into<String>) -> Self {
        Self {
            net_ip: net_ip.into(),
        }
    }

    pub fn build(connection: &Arc<MolerConnection>, net_ip: impl Into<String>) -> Arc<Event> {
        let net_ip = net_ip.into();
        Event::new(
            format!("net_down({net_ip})"),
            connection.clone(),
            Box::new(Self::new(net_ip)),
        )
    }
}

impl EventBehavior for NetworkDownDetector {
    fn on_line(&mut self, line: &str, is_full_line: bool, received_at: SystemTime) -> Option<Value> {
        if is_full_line && line.contains("Network is unreachable") {
            let time = epoch_seconds(received_at);
            info!("network {} is down", self.net_ip);
            Some(json!({ "ip": self.net_ip, "time": time }))
        } else {
            None
        }
    }
}

/// Resolves when ping replies come back (`bytes from <ip>`).
pub struct NetworkUpDetector {
    net_ip: String,
    needle: String,
}

impl NetworkUpDetector {
    pub fn new(net_ip: impl Into<String>) -> Self {
        let net_ip = net_ip.into();
        let needle = format!("bytes from {net_ip}");
        Self { net_ip, needle }
    }

    pub fn build(connection: &Arc<MolerConnection>, net_ip: impl Into<String>) -> Arc<Event> {
        let net_ip = net_ip.into();
        Event::new(
            format!("net_up({net_ip})"),
            connection.clone(),
            Box::new(Self::new(net_ip)),
        )
    }
}

impl EventBehavior for NetworkUpDetector {
    fn on_line(&mut self, line: &str, is_full_line: bool, received_at: SystemTime) -> Option<Value> {
        if is_full_line && line.contains(&self.needle) {
            let time = epoch_seconds(received_at);
            info!("network {} is back up", self.net_ip);
            Some(json!({ "ip": self.net_ip, "time": time }))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connection::io::memory::MemoryIo;
    use connection::io::RemoteIo;
    use observer::runner::Runner;
    use observer::Observer;

    #[tokio::test]
    async fn down_then_up_detection_over_simulated_ping() {
        let conn = MolerConnection::new("ping-updown");
        let io = MemoryIo::new(conn.clone());

        // Both detectors are started before the io opens, so the very first
        // injected bytes cannot be missed.
        let down = NetworkDownDetector::build(&conn, "10.0.2.15");
        let up = NetworkUpDetector::build(&conn, "10.0.2.15");
        let runner = Runner::new();
        runner.submit(&down).unwrap();
        io.open().await.unwrap();

        let before = epoch_seconds(SystemTime::now());
        io.inject("64 bytes from 10.0.2.15: icmp_req=3 ttl=64 time=0.045 ms\nping: sendmsg: Network is unreachable\n");
        let after = epoch_seconds(SystemTime::now());

        let outcome = down.core().await_done().await.unwrap();
        assert_eq!(outcome["ip"], json!("10.0.2.15"));
        let stamped = outcome["time"].as_f64().unwrap();
        assert!(stamped >= before && stamped <= after);

        runner.submit(&up).unwrap();
        io.inject("ping: sendmsg: Network is unreachable\n");
        assert!(!up.is_done());
        io.inject("64 bytes from 10.0.2.15: icmp_req=7 ttl=64 time=0.123 ms\n");

        let outcome = up.core().await_done().await.unwrap();
        assert_eq!(outcome["ip"], json!("10.0.2.15"));
    }

    #[tokio::test]
    async fn down_detector_ignores_healthy_replies() {
        let conn = MolerConnection::new("ping-quiet");
        let down = NetworkDownDetector::build(&conn, "10.0.2.15");
        let runner = Runner::new();
        runner.submit(&down).unwrap();

        conn.data_received(
            b"64 bytes from 10.0.2.15: icmp_req=1 ttl=64 time=0.080 ms\n",
            SystemTime::now(),
        );
        assert!(!down.is_done());
    }
}
