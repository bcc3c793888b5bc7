//! Per-peer receive sessions.
//!
//! The server keeps one [`Session`] per remote address, created on the
//! first `data` packet from that address and removed when the peer sends
//! `fin`.  The registry is owned by [`crate::server::Server`]; nothing here
//! is global.
//!
//! Two things bound the registry:
//! - A closed peer is remembered for [`TIME_WAIT`], so late duplicates of
//!   its data are acknowledged without opening a fresh session at offset 0.
//! - A session that sees no data for its idle timeout is dropped by
//!   [`SessionRegistry::sweep`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::packet::SeqRange;
use crate::receiver::Receiver;

/// Sessions idle longer than this are dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// How long a peer stays closed after its `fin`.
pub const TIME_WAIT: Duration = Duration::from_secs(30);

/// Closed peers remembered at once; the oldest is forgotten first.
const MAX_CLOSED_PEERS: usize = 4096;

/// Receive state plus everything delivered so far for one peer.
#[derive(Debug)]
pub struct Session {
    receiver: Receiver,
    delivered: String,
    packets: u64,
    started: Instant,
    last_seen: Instant,
}

impl Session {
    fn new(now: Instant) -> Self {
        Self {
            receiver: Receiver::new(),
            delivered: String::new(),
            packets: 0,
            started: now,
            last_seen: now,
        }
    }

    /// Feed one segment to the receiver and keep whatever became ready.
    /// Returns the ranges to acknowledge.
    pub fn on_data(&mut self, seq: SeqRange, payload: String) -> Vec<SeqRange> {
        self.packets += 1;
        self.last_seen = Instant::now();
        let (sacks, ready) = self.receiver.data_packet(seq, payload);
        self.delivered.push_str(&ready);
        sacks
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn delivered(&self) -> &str {
        &self.delivered
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Run the end-of-stream diagnostics and hand back the stream.
    pub fn finish(self, peer: SocketAddr) -> CompletedTransfer {
        let delivered_all = self.receiver.finish();
        CompletedTransfer {
            peer,
            data: self.delivered,
            delivered_all,
            packets: self.packets,
            elapsed: self.started.elapsed(),
            saved_to: None,
        }
    }
}

/// A stream whose sender has signalled the end.
#[derive(Debug, Clone)]
pub struct CompletedTransfer {
    pub peer: SocketAddr,
    /// Everything delivered in order.
    pub data: String,
    /// `false` when segments were still buffered behind a gap.
    pub delivered_all: bool,
    /// Data packets received, duplicates included.
    pub packets: u64,
    pub elapsed: Duration,
    /// File the stream was written to, if an output directory is set and
    /// the write succeeded.
    pub saved_to: Option<PathBuf>,
}

/// Sessions keyed by peer address.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<SocketAddr, Session>,
    /// Peers that sent `fin`, with the time it arrived.
    closed: HashMap<SocketAddr, Instant>,
    idle_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            closed: HashMap::new(),
            idle_timeout,
        }
    }

    pub fn get_or_create(&mut self, peer: SocketAddr) -> &mut Session {
        self.closed.remove(&peer);
        self.sessions.entry(peer).or_insert_with(|| {
            log::info!("[server] new session for {peer}");
            Session::new(Instant::now())
        })
    }

    /// Remove `peer`'s session and remember the peer as closed.
    pub fn close(&mut self, peer: SocketAddr, now: Instant) -> Option<Session> {
        let session = self.sessions.remove(&peer)?;
        if self.closed.len() >= MAX_CLOSED_PEERS {
            let oldest = self
                .closed
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(addr, _)| *addr);
            if let Some(addr) = oldest {
                self.closed.remove(&addr);
            }
        }
        self.closed.insert(peer, now);
        Some(session)
    }

    /// Whether `peer` finished a stream less than [`TIME_WAIT`] ago.
    pub fn recently_closed(&self, peer: &SocketAddr, now: Instant) -> bool {
        self.closed
            .get(peer)
            .is_some_and(|at| now.saturating_duration_since(*at) < TIME_WAIT)
    }

    /// Drop idle sessions and expired closed peers. Returns the peers whose
    /// sessions were dropped.
    pub fn sweep(&mut self, now: Instant) -> Vec<SocketAddr> {
        self.closed
            .retain(|_, at| now.saturating_duration_since(*at) < TIME_WAIT);

        let idle: Vec<SocketAddr> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_seen) >= self.idle_timeout)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &idle {
            if let Some(session) = self.sessions.remove(addr) {
                log::warn!(
                    "[server] dropping idle session for {addr} after {} packet(s), {} units delivered",
                    session.packets,
                    session.receiver.expected_offset()
                );
            }
        }
        idle
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn contains(&self, peer: &SocketAddr) -> bool {
        self.sessions.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn sessions_are_independent_per_peer() {
        let mut reg = SessionRegistry::new();
        reg.get_or_create(addr(1)).on_data(SeqRange::new(0, 3), "abc".into());
        reg.get_or_create(addr(2)).on_data(SeqRange::new(3, 6), "xyz".into());

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get_or_create(addr(1)).delivered(), "abc");
        assert_eq!(reg.get_or_create(addr(2)).delivered(), "");
        assert_eq!(reg.get_or_create(addr(2)).receiver().pending_len(), 1);
    }

    #[test]
    fn finish_reports_gaps() {
        let mut reg = SessionRegistry::new();
        let s = reg.get_or_create(addr(1));
        s.on_data(SeqRange::new(0, 2), "ab".into());
        s.on_data(SeqRange::new(4, 6), "ef".into());

        let done = reg.close(addr(1), Instant::now()).unwrap().finish(addr(1));
        assert_eq!(done.data, "ab");
        assert!(!done.delivered_all);
        assert_eq!(done.packets, 2);
        assert!(done.saved_to.is_none());
        assert!(reg.is_empty());
        assert!(!reg.contains(&addr(1)));
    }

    #[test]
    fn closed_peer_is_remembered_until_time_wait_ends() {
        let mut reg = SessionRegistry::new();
        reg.get_or_create(addr(1)).on_data(SeqRange::new(0, 1), "a".into());
        let now = Instant::now();
        assert!(reg.close(addr(1), now).is_some());

        assert!(reg.recently_closed(&addr(1), now));
        assert!(!reg.recently_closed(&addr(2), now));
        assert!(!reg.recently_closed(&addr(1), now + TIME_WAIT));

        reg.sweep(now + TIME_WAIT);
        assert!(!reg.recently_closed(&addr(1), now));
    }

    #[test]
    fn closing_unknown_peer_records_nothing() {
        let mut reg = SessionRegistry::new();
        let now = Instant::now();
        assert!(reg.close(addr(9), now).is_none());
        assert!(!reg.recently_closed(&addr(9), now));
    }

    #[test]
    fn sweep_drops_only_idle_sessions() {
        let idle = Duration::from_secs(5);
        let mut reg = SessionRegistry::with_idle_timeout(idle);
        reg.get_or_create(addr(1)).on_data(SeqRange::new(0, 1), "a".into());
        let now = Instant::now();

        assert!(reg.sweep(now).is_empty());
        assert_eq!(reg.len(), 1);

        assert_eq!(reg.sweep(now + idle + Duration::from_secs(1)), vec![addr(1)]);
        assert!(reg.is_empty());
    }
}
