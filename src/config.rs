//! Process-level configuration for both roles.
//!
//! None of this reaches the protocol core: [`crate::sender::Sender`] and
//! [`crate::receiver::Receiver`] only see offsets and payloads.  The structs
//! are filled from the command line in `main.rs` and checked with
//! `validate()` before any socket is opened.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::packet::MAX_PACKET_SIZE;
use crate::session::DEFAULT_IDLE_TIMEOUT;
use crate::simulator::SimulatorConfig;
use crate::timer::TimerConfig;

/// Default receive-window budget in bytes.
pub const DEFAULT_RECV_WINDOW: u64 = 15_000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("receive window of {0} bytes cannot hold a single {max}-byte packet", max = MAX_PACKET_SIZE)]
    WindowTooSmall(u64),
    #[error("loss rate {0} is outside [0, 1]")]
    LossRate(f64),
    #[error("reorder window must be at least 1 packet")]
    ReorderWindow,
    #[error("ack timeout must be non-zero")]
    ZeroTimeout,
}

/// Sending side.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Receiver address.
    pub peer: SocketAddr,
    /// Bytes allowed in flight; a packet is sent only while
    /// `inflight + MAX_PACKET_SIZE < recv_window`.
    pub recv_window: u64,
    pub timer: TimerConfig,
    pub simulator: SimulatorConfig,
}

impl SenderConfig {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            recv_window: DEFAULT_RECV_WINDOW,
            timer: TimerConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.timer.ack_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recv_window <= MAX_PACKET_SIZE as u64 {
            return Err(ConfigError::WindowTooSmall(self.recv_window));
        }
        let loss = self.simulator.loss_rate;
        if !(0.0..=1.0).contains(&loss) {
            return Err(ConfigError::LossRate(loss));
        }
        if self.simulator.reorder_window == 0 {
            return Err(ConfigError::ReorderWindow);
        }
        if self.timer.ack_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

/// Receiving side.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub bind: SocketAddr,
    /// When set, each completed stream is written to
    /// `<output_dir>/rcvd-<ip>-<port>`.
    pub output_dir: Option<PathBuf>,
    /// Sessions that see no data for this long are dropped.
    pub idle_timeout: Duration,
}

impl ReceiverConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            output_dir: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}
