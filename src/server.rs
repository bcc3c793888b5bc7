//! Receiving side: one socket, many peers.
//!
//! ```text
//!   data ──▶ Session(peer).on_data ──▶ ack{sacks, id}
//!   fin  ──▶ Session(peer).finish  ──▶ fin
//! ```
//!
//! Datagrams are handled one at a time, so each peer's [`Receiver`] sees
//! its segments strictly serialised.  Nothing a single peer sends can stop
//! the loop: malformed datagrams, unexpected packet types, failed replies
//! and failed output writes are logged and dropped.
//!
//! A peer that has sent `fin` stays closed for [`TIME_WAIT`]; late copies
//! of its data are acknowledged but never reopen a session.
//!
//! [`Receiver`]: crate::receiver::Receiver

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::ReceiverConfig;
use crate::packet::{Packet, SeqRange};
use crate::session::{CompletedTransfer, SessionRegistry, TIME_WAIT};
use crate::socket::{Socket, SocketError};

/// Characters of each completed stream shown in the summary log line.
const SUMMARY_CHARS: usize = 100;

/// Upper bound on the time between registry sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Socket(#[from] SocketError),
}

pub struct Server {
    socket: Socket,
    sessions: SessionRegistry,
    output_dir: Option<PathBuf>,
    last_sweep: Instant,
}

impl Server {
    pub async fn bind(config: ReceiverConfig) -> Result<Self, ServerError> {
        let socket = Socket::bind(config.bind).await?;
        log::info!("[server] listening on {}", socket.local_addr);
        Ok(Self {
            socket,
            sessions: SessionRegistry::with_idle_timeout(config.idle_timeout),
            output_dir: config.output_dir,
            last_sweep: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Peers with a transfer in progress.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Serve every peer forever, logging each completed stream.
    pub async fn run(mut self) -> Result<(), ServerError> {
        loop {
            let done = self.next_transfer().await?;
            log::info!(
                "[server] {}: {} units in {} packets over {:.2}s; {} session(s) still open",
                done.peer,
                done.data.chars().count(),
                done.packets,
                done.elapsed.as_secs_f64(),
                self.active_sessions()
            );
        }
    }

    /// Process datagrams until some peer finishes a non-empty stream.
    pub async fn next_transfer(&mut self) -> Result<CompletedTransfer, ServerError> {
        loop {
            let (packet, peer) = match self.socket.recv_from().await {
                Ok(received) => received,
                Err(SocketError::Malformed { peer, source }) => {
                    log::warn!("[server] dropping malformed datagram from {peer}: {source}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let now = Instant::now();
            self.sweep(now);

            match packet {
                Packet::Data { seq, id, .. } if self.sessions.recently_closed(&peer, now) => {
                    log::debug!("[server] ← late data seq={seq} id={id} from closed {peer}; → ack");
                    self.reply(&Packet::ack(vec![seq], id), peer).await;
                }
                Packet::Data { seq, id, payload } => {
                    let sacks = self.sessions.get_or_create(peer).on_data(seq, payload);
                    log::debug!(
                        "[server] ← data seq={seq} id={id} from {peer}; → sacks {}",
                        format_ranges(&sacks)
                    );
                    self.reply(&Packet::ack(sacks, id), peer).await;
                }
                Packet::Fin => {
                    self.reply(&Packet::Fin, peer).await;
                    match self.sessions.close(peer, now) {
                        Some(session) if session.receiver().expected_offset() == 0 => {
                            log::warn!(
                                "[server] ← fin from {peer} before any data was delivered; discarding {} packet(s)",
                                session.packets()
                            );
                        }
                        Some(session) => {
                            log::info!("[server] ← fin from {peer}; → fin");
                            let mut done = session.finish(peer);
                            self.report(&mut done).await;
                            return Ok(done);
                        }
                        None => log::debug!("[server] ← fin from {peer} with no session; → fin"),
                    }
                }
                Packet::Ack { id, .. } => {
                    log::warn!("[server] unexpected ack id={id} from {peer}; dropping");
                }
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        let interval = self.sessions.idle_timeout().min(SWEEP_INTERVAL).min(TIME_WAIT);
        if now.saturating_duration_since(self.last_sweep) < interval {
            return;
        }
        self.last_sweep = now;
        self.sessions.sweep(now);
    }

    async fn reply(&self, packet: &Packet, peer: SocketAddr) {
        if let Err(e) = self.socket.send_to(packet, peer).await {
            log::warn!("[server] failed to send {} to {peer}: {e}", packet.kind());
        }
    }

    /// Log a summary and, if configured, save the stream. A failed write is
    /// logged and leaves `saved_to` empty.
    async fn report(&self, done: &mut CompletedTransfer) {
        let preview: String = done.data.chars().take(SUMMARY_CHARS).collect();
        log::info!(
            "[server] received data (summary): {preview:?} ... {}",
            done.data.chars().count()
        );

        if let Some(dir) = &self.output_dir {
            done.saved_to = save(dir, done).await;
        }
    }
}

async fn save(dir: &Path, done: &CompletedTransfer) -> Option<PathBuf> {
    let path = dir.join(format!("rcvd-{}-{}", done.peer.ip(), done.peer.port()));
    match tokio::fs::write(&path, done.data.as_bytes()).await {
        Ok(()) => {
            log::info!("[server] stream from {} saved to {}", done.peer, path.display());
            Some(path)
        }
        Err(e) => {
            log::error!("[server] cannot write {}: {e}", path.display());
            None
        }
    }
}

fn format_ranges(ranges: &[SeqRange]) -> String {
    let parts: Vec<String> = ranges.iter().map(|r| format!("[{}, {}]", r.start, r.end)).collect();
    format!("[{}]", parts.join(", "))
}
