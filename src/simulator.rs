//! Optional impairment layer for exercising the protocol.
//!
//! Loopback and LAN links rarely lose or reorder anything, so the client can
//! route its outgoing data packets through a [`Simulator`] that applies a
//! simple fault model:
//!
//! | Fault       | Description                                              |
//! |-------------|----------------------------------------------------------|
//! | Packet loss | Drop a packet with probability `loss_rate`.              |
//! | Reordering  | Hold up to `reorder_window` packets, then send them in a |
//! |             | random order.                                            |
//!
//! The same loss probability is applied to acks on receipt
//! ([`Simulator::drop_inbound`]).  The protocol never depends on this
//! module; with the default config it is a transparent pass-through.

use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::packet::Packet;
use crate::socket::{Socket, SocketError};

/// Configuration for the fault model.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Probability in `[0.0, 1.0]` that a packet is silently dropped.
    pub loss_rate: f64,
    /// Number of packets held and shuffled together (1 = no reordering).
    pub reorder_window: usize,
    /// Seed for reproducible runs; entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_window: 1,
            seed: None,
        }
    }
}

/// A fault-injecting stage in front of the socket.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    held: Vec<Packet>,
    dropped: u64,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            held: Vec::with_capacity(config.reorder_window),
            config,
            rng,
            dropped: 0,
        }
    }

    /// Send `packet` through the simulated network.
    ///
    /// The packet may be dropped, or held until the reorder buffer fills.
    pub async fn transmit(
        &mut self,
        socket: &Socket,
        peer: SocketAddr,
        packet: Packet,
    ) -> Result<(), SocketError> {
        if self.roll_loss() {
            log::debug!("[sim] dropped outgoing {}", packet.kind());
            return Ok(());
        }
        self.held.push(packet);
        if self.held.len() >= self.config.reorder_window {
            self.flush(socket, peer).await?;
        }
        Ok(())
    }

    /// Send everything currently held, in random order.
    pub async fn flush(&mut self, socket: &Socket, peer: SocketAddr) -> Result<(), SocketError> {
        if self.held.is_empty() {
            return Ok(());
        }
        self.held.shuffle(&mut self.rng);
        for packet in self.held.drain(..) {
            socket.send_to(&packet, peer).await?;
        }
        Ok(())
    }

    /// Decide whether a received packet is lost.
    pub fn drop_inbound(&mut self) -> bool {
        let lost = self.roll_loss();
        if lost {
            log::debug!("[sim] dropped incoming packet");
        }
        lost
    }

    /// Packets held for reordering, not yet sent.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Packets dropped so far, in either direction.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn roll_loss(&mut self) -> bool {
        let lost =
            self.config.loss_rate > 0.0 && self.rng.random::<f64>() < self.config.loss_rate;
        if lost {
            self.dropped += 1;
        }
        lost
    }
}
