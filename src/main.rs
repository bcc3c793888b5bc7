//! Entry point for `sack-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **receiver** or **sender**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing, reading the input file).

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use sack_over_udp::config::{ReceiverConfig, SenderConfig, DEFAULT_RECV_WINDOW};
use sack_over_udp::session::DEFAULT_IDLE_TIMEOUT;
use sack_over_udp::simulator::SimulatorConfig;
use sack_over_udp::source::StreamSource;
use sack_over_udp::timer::TimerConfig;
use sack_over_udp::{Client, Server};

/// Reliable ordered stream over UDP with selective acknowledgements.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Listen for senders and reassemble their streams.
    Receiver {
        /// IP address to bind (0.0.0.0 listens on all interfaces).
        #[arg(long)]
        ip: String,
        /// Port to bind.
        #[arg(long)]
        port: u16,
        /// Write each completed stream to rcvd-<ip>-<port> in this directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Drop sessions that send nothing for this many seconds.
        #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
        idle_timeout_secs: u64,
    },
    /// Send a file to a receiver.
    Sender {
        /// Receiver IP address.
        #[arg(long)]
        ip: String,
        /// Receiver port.
        #[arg(long)]
        port: u16,
        /// File whose contents are sent.
        #[arg(long)]
        sendfile: PathBuf,
        /// Receive window size in bytes.
        #[arg(long, alias = "recv_window", default_value_t = DEFAULT_RECV_WINDOW)]
        recv_window: u64,
        /// Fraction of packets (0-1) to drop on purpose.
        #[arg(long, default_value_t = 0.0)]
        simloss: f64,
        /// Number of packets to shuffle together (1 disables reordering).
        #[arg(long, alias = "pkts_to_reorder", default_value_t = 1)]
        pkts_to_reorder: usize,
        /// Ack deadline in milliseconds.
        #[arg(long, default_value_t = 500)]
        ack_timeout_ms: u64,
        /// Double the deadline on consecutive timeouts.
        #[arg(long)]
        backoff: bool,
        /// Give up after this many consecutive timeouts.
        #[arg(long)]
        max_timeouts: Option<u32>,
        /// Seed for the loss/reorder simulator.
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn resolve(ip: &str, port: u16) -> Result<SocketAddr> {
    (ip, port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {ip}:{port}"))?
        .next()
        .ok_or_else(|| anyhow!("no address for {ip}:{port}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.role {
        Role::Receiver {
            ip,
            port,
            output_dir,
            idle_timeout_secs,
        } => {
            let config = ReceiverConfig {
                bind: resolve(&ip, port)?,
                output_dir,
                idle_timeout: Duration::from_secs(idle_timeout_secs),
            };
            Server::bind(config).await?.run().await?;
        }
        Role::Sender {
            ip,
            port,
            sendfile,
            recv_window,
            simloss,
            pkts_to_reorder,
            ack_timeout_ms,
            backoff,
            max_timeouts,
            seed,
        } => {
            let config = SenderConfig {
                peer: resolve(&ip, port)?,
                recv_window,
                timer: TimerConfig {
                    ack_timeout: Duration::from_millis(ack_timeout_ms),
                    backoff,
                    max_consecutive_timeouts: max_timeouts,
                    ..TimerConfig::default()
                },
                simulator: SimulatorConfig {
                    loss_rate: simloss,
                    reorder_window: pkts_to_reorder,
                    seed,
                },
            };
            let source = StreamSource::from_path(&sendfile)
                .await
                .with_context(|| format!("cannot read {}", sendfile.display()))?;

            let report = Client::new(config, source).await?.run().await?;
            log::info!(
                "sent {} units in {:.2}s: {} packets, {} retransmitted, {} timeouts, {} dropped by simulator",
                report.length,
                report.elapsed.as_secs_f64(),
                report.packets_sent,
                report.retransmissions,
                report.timeouts,
                report.simulated_drops
            );
        }
    }

    Ok(())
}
