//! Finite-state-machine types.
//!
//! The protocol has very few states, so they are kept here as plain enums
//! rather than spread across the modules that drive them:
//! - [`SenderPhase`] is derived from [`crate::sender::Sender`]'s offsets.
//! - [`ConnectionState`] is tracked by [`crate::client::Client`] around the
//!   termination handshake.

/// Lifecycle of the send-side state machine.
///
/// ```text
///  ACTIVE ──(cursor past end && nothing unacknowledged)──▶ DONE
/// ```
///
/// There is no transition out of `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderPhase {
    #[default]
    Active,
    Done,
}

/// State of one client connection.
///
/// ```text
///  TRANSFERRING ──all data acked──▶ FIN_SENT ──fin received──▶ CLOSED
///                                      │  ▲
///                                      └──┘ ack received / deadline: resend fin
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Data segments are being sent and acknowledged.
    #[default]
    Transferring,
    /// Every segment is acknowledged; waiting for the peer's `fin`.
    FinSent,
    /// Peer answered the `fin` (or the handshake was abandoned).
    Closed,
}

impl std::fmt::Display for SenderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str("ACTIVE"),
            Self::Done => f.write_str("DONE"),
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transferring => f.write_str("TRANSFERRING"),
            Self::FinSent => f.write_str("FIN_SENT"),
            Self::Closed => f.write_str("CLOSED"),
        }
    }
}
