//! Sending side: drive a [`Sender`] over one UDP socket.
//!
//! # Loop
//!
//! ```text
//!            room in window && !waiting            otherwise
//!   ┌──────────────────┴──────────────────┐   ┌──────┴──────────────────────┐
//!   Sender::send()                            flush held packets
//!     Segment  → data packet → simulator      wait ≤ deadline for one ack
//!     Stalled  → waiting = true                 ack     → Sender::ack_packet
//!     Complete → fin handshake                  expired → Sender::timeout
//! ```
//!
//! In-flight accounting is done here, in payload units: it grows by the
//! length of every data packet handed to the simulator, shrinks by the units
//! each ack newly confirms, and is reset to zero when the deadline expires.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::timeout;

use crate::config::{ConfigError, SenderConfig};
use crate::packet::{Packet, PacketError, SeqRange, MAX_PACKET_SIZE};
use crate::sender::{SendOutcome, Sender};
use crate::simulator::Simulator;
use crate::socket::{Socket, SocketError};
use crate::source::StreamSource;
use crate::state::ConnectionState;
use crate::timer::RetransmitTimer;

/// Fin retransmissions on deadline expiry before closing anyway.
pub const MAX_FIN_RETRIES: u32 = 8;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("no ack from {peer} after {timeouts} consecutive timeouts")]
    PeerUnresponsive { peer: SocketAddr, timeouts: u32 },
    #[error("segment {0} lies outside the stream")]
    SegmentOutOfRange(SeqRange),
    /// The JSON form of this segment does not fit in one datagram, usually
    /// because its text is dense in multibyte or escaped characters.
    #[error("segment {range} cannot be sent: {source}")]
    Unencodable { range: SeqRange, source: PacketError },
}

/// Summary of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Stream length in offset units.
    pub length: u64,
    /// Data packets produced by the sender, retransmissions included.
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    /// Packets lost to the simulator, both directions.
    pub simulated_drops: u64,
    /// `false` when the peer never answered our `fin`.
    pub fin_acknowledged: bool,
    pub elapsed: Duration,
}

/// One outgoing stream to one peer.
pub struct Client {
    socket: Socket,
    peer: SocketAddr,
    source: StreamSource,
    sender: Sender,
    simulator: Simulator,
    timer: RetransmitTimer,
    state: ConnectionState,
    recv_window: u64,
    inflight: u64,
    next_packet_id: u64,
}

impl Client {
    /// Validate `config` and bind an ephemeral socket for talking to the peer.
    pub async fn new(config: SenderConfig, source: StreamSource) -> Result<Self, ClientError> {
        config.validate()?;
        let socket = Socket::bind_for(config.peer).await?;
        log::info!(
            "[client] {} → {}: {} units to send",
            socket.local_addr,
            config.peer,
            source.len()
        );
        Ok(Self {
            socket,
            peer: config.peer,
            sender: Sender::new(source.len()),
            source,
            simulator: Simulator::new(config.simulator),
            timer: RetransmitTimer::new(config.timer),
            state: ConnectionState::Transferring,
            recv_window: config.recv_window,
            inflight: 0,
            next_packet_id: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Send the whole stream, then run the termination handshake.
    pub async fn run(mut self) -> Result<TransferReport, ClientError> {
        let started = Instant::now();
        let mut waiting = false;

        while self.state == ConnectionState::Transferring {
            if self.has_room() && !waiting {
                match self.sender.send() {
                    SendOutcome::Segment(range) => self.transmit(range).await?,
                    SendOutcome::Stalled => waiting = true,
                    SendOutcome::Complete => {
                        self.simulator.flush(&self.socket, self.peer).await?;
                        self.state = ConnectionState::FinSent;
                    }
                }
            } else {
                waiting = false;
                self.simulator.flush(&self.socket, self.peer).await?;
                self.await_ack().await?;
            }
        }

        let fin_acknowledged = self.close().await?;
        Ok(TransferReport {
            length: self.sender.total_length(),
            packets_sent: self.sender.segments_sent(),
            retransmissions: self.sender.retransmissions(),
            timeouts: self.timer.total_timeouts(),
            simulated_drops: self.simulator.dropped(),
            fin_acknowledged,
            elapsed: started.elapsed(),
        })
    }

    fn has_room(&self) -> bool {
        self.inflight + (MAX_PACKET_SIZE as u64) < self.recv_window
    }

    async fn transmit(&mut self, range: SeqRange) -> Result<(), ClientError> {
        let payload = self
            .source
            .slice(range)
            .ok_or(ClientError::SegmentOutOfRange(range))?
            .to_owned();
        let id = self.next_packet_id;
        log::debug!("[client] → data seq={range} id={id}");

        let packet = Packet::Data {
            seq: range,
            id,
            payload,
        };
        if let Err(source) = packet.encode() {
            return Err(ClientError::Unencodable { range, source });
        }
        self.simulator.transmit(&self.socket, self.peer, packet).await?;
        self.inflight += range.len();
        self.next_packet_id += 1;
        Ok(())
    }

    /// Wait for one ack, or handle the deadline expiring.
    async fn await_ack(&mut self) -> Result<(), ClientError> {
        match timeout(self.timer.deadline(), self.recv_from_peer()).await {
            Ok(Ok(Packet::Ack { sacks, id })) => {
                if self.simulator.drop_inbound() {
                    return Ok(());
                }
                let acked = self.sender.ack_packet(&sacks, id);
                self.inflight = self.inflight.saturating_sub(acked.bytes);
                self.timer.on_ack();
                log::debug!(
                    "[client] ← ack id={id} sacks={} newly acked {} segment(s), inflight={}",
                    sacks.len(),
                    acked.segments,
                    self.inflight
                );
            }
            Ok(Ok(other)) => {
                log::warn!("[client] unexpected {} while transferring; dropping", other.kind());
            }
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => {
                self.inflight = 0;
                self.sender.timeout();
                let keep_going = self.timer.on_timeout();
                log::debug!(
                    "[client] timeout #{}; rewinding to {}",
                    self.timer.consecutive_timeouts(),
                    self.sender.next_offset()
                );
                if !keep_going {
                    return Err(ClientError::PeerUnresponsive {
                        peer: self.peer,
                        timeouts: self.timer.consecutive_timeouts(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Termination handshake. Returns whether the peer answered with `fin`.
    async fn close(&mut self) -> Result<bool, ClientError> {
        let mut retries = 0u32;
        loop {
            self.socket.send_to(&Packet::Fin, self.peer).await?;
            log::debug!("[client] → fin");

            match timeout(self.timer.deadline(), self.recv_from_peer()).await {
                Ok(Ok(Packet::Fin)) => {
                    log::info!("[client] ← fin; connection closed");
                    self.state = ConnectionState::Closed;
                    return Ok(true);
                }
                // Peer is still working through earlier data; ask again.
                Ok(Ok(Packet::Ack { id, .. })) => log::trace!("[client] ← late ack id={id}"),
                Ok(Ok(Packet::Data { .. })) => log::warn!("[client] unexpected data; dropping"),
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => {
                    retries += 1;
                    if retries > MAX_FIN_RETRIES {
                        log::warn!("[client] fin not answered; closing anyway");
                        self.state = ConnectionState::Closed;
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Next valid packet from the peer. Malformed datagrams and datagrams
    /// from other addresses are skipped.
    async fn recv_from_peer(&self) -> Result<Packet, ClientError> {
        loop {
            match self.socket.recv_from().await {
                Ok((packet, from)) if from == self.peer => return Ok(packet),
                Ok((packet, from)) => {
                    log::debug!("[client] ignoring {} from stranger {from}", packet.kind());
                }
                Err(SocketError::Malformed { peer, source }) => {
                    log::warn!("[client] dropping malformed datagram from {peer}: {source}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Convenience wrapper: build a [`Client`] and run it to completion.
pub async fn send_stream(
    config: SenderConfig,
    source: StreamSource,
) -> Result<TransferReport, ClientError> {
    Client::new(config, source).await?.run().await
}
