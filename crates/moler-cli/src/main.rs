// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Demo binary: simulated-ping servers observed over real TCP connections.
//!
//! `ping-demo` starts one TCP server per connection, each replaying canned
//! `ping` output one line per second. A client side opens a moler
//! connection over each server, runs a network-down detector to completion,
//! then a network-up detector, and reports both wall-clock timestamps.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{info, warn};

use connection::io::tcp::TcpIo;
use connection::io::RemoteIo;
use connection::MolerConnection;
use observer::runner::Runner;
use observer::Observer;
use unix::events::ping::{NetworkDownDetector, NetworkUpDetector};

const PING_OUTPUT: &str = "\
greg@debian:~$ ping 10.0.2.15
PING 10.0.2.15 (10.0.2.15) 56(84) bytes of data.
64 bytes from 10.0.2.15: icmp_req=1 ttl=64 time=0.080 ms
64 bytes from 10.0.2.15: icmp_req=2 ttl=64 time=0.037 ms
64 bytes from 10.0.2.15: icmp_req=3 ttl=64 time=0.045 ms
ping: sendmsg: Network is unreachable
ping: sendmsg: Network is unreachable
ping: sendmsg: Network is unreachable
64 bytes from 10.0.2.15: icmp_req=7 ttl=64 time=0.123 ms
64 bytes from 10.0.2.15: icmp_req=8 ttl=64 time=0.056 ms
";

#[derive(Parser)]
#[command(name = "moler", version, about = "textual-connection automation demo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// observe simulated ping streams and report network down/up times
    PingDemo(PingDemoOpts),

    /// parse a device configuration file and list what it defines
    CheckConfig {
        /// path to a TOML configuration document
        path: String,
    },
}

#[derive(Parser, Debug)]
struct PingDemoOpts {
    /// first TCP port; each further connection uses the next port
    #[arg(long, default_value_t = 5671)]
    base_port: u16,

    /// how many servers/observing connections to run in parallel
    #[arg(long, default_value_t = 2)]
    connections: u16,

    /// address the first simulated ping targets; later connections
    /// increment the last octet
    #[arg(long, default_value = "10.0.2.15")]
    ping_ip: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    util::logging::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::PingDemo(opts) => ping_demo(opts).await,
        Commands::CheckConfig { path } => check_config(&path),
    }
}

async fn ping_demo(opts: PingDemoOpts) -> Result<()> {
    let mut observers = Vec::new();
    for index in 0..opts.connections {
        let port = opts.base_port + index;
        let ping_ip = nth_ping_ip(&opts.ping_ip, index)?;

        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("cannot bind ping simulator to port {port}"))?;
        info!("ping simulator for {} listening on port {}", ping_ip, port);
        let server_ip = ping_ip.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_ping(listener, &server_ip).await {
                warn!("ping simulator for {} failed: {e:?}", server_ip);
            }
        });

        observers.push(tokio::spawn(async move {
            observe_ping(port, ping_ip).await
        }));
    }

    for observer in observers {
        let (ping_ip, down_at, up_at) = observer.await.context("observer task panicked")??;
        println!("{ping_ip}: network down at {down_at:.3}, back up at {up_at:.3}");
    }
    Ok(())
}

/// One-shot server: replays the canned ping output towards a single client,
/// one line per second.
async fn serve_ping(listener: TcpListener, ping_ip: &str) -> Result<()> {
    let (mut socket, peer) = listener.accept().await.context("accept failed")?;
    info!("ping simulator for {}: client at {}", ping_ip, peer);
    let output = PING_OUTPUT.replace("10.0.2.15", ping_ip);
    for line in output.split_inclusive('\n') {
        socket
            .write_all(line.as_bytes())
            .await
            .context("client went away")?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Ok(())
}

/// Client side: a down detector armed before the io opens, then an up
/// detector over the same live connection.
async fn observe_ping(port: u16, ping_ip: String) -> Result<(String, f64, f64)> {
    let conn = MolerConnection::new(format!("ping-tcp({port})"));
    let runner = Runner::new();

    let down = NetworkDownDetector::build(&conn, ping_ip.clone());
    runner
        .submit(&down)
        .context("cannot start network-down detector")?;

    let io = TcpIo::new(conn.clone(), format!("127.0.0.1:{port}"));
    io.open().await.context("cannot reach ping simulator")?;

    let down_outcome = down
        .core()
        .await_done()
        .await
        .context("network-down detection failed")?;

    let up = NetworkUpDetector::build(&conn, ping_ip.clone());
    runner
        .submit(&up)
        .context("cannot start network-up detector")?;
    let up_outcome = up
        .core()
        .await_done()
        .await
        .context("network-up detection failed")?;

    io.close().await;
    runner.shutdown();

    let down_at = down_outcome["time"].as_f64().unwrap_or_default();
    let up_at = up_outcome["time"].as_f64().unwrap_or_default();
    Ok((ping_ip, down_at, up_at))
}

fn nth_ping_ip(base: &str, index: u16) -> Result<String> {
    if index == 0 {
        return Ok(base.to_string());
    }
    let (prefix, last) = base
        .rsplit_once('.')
        .context("ping ip must be a dotted address")?;
    let last: u16 = last.parse().context("ping ip must end in a number")?;
    Ok(format!("{prefix}.{}", last + index))
}

fn check_config(path: &str) -> Result<()> {
    let parsed = config::load_path(path)?;
    println!("{} device(s) defined", parsed.devices.len());
    for (name, entry) in &parsed.devices {
        let io_type = entry
            .connection_desc
            .as_ref()
            .map(|desc| desc.io_type.as_str())
            .unwrap_or("terminal");
        println!("  {name}: {} over {io_type}", entry.device_class);
    }
    for (io_type, variant) in &parsed.connection_types {
        println!("  io {io_type} -> variant {variant}");
    }
    Ok(())
}
