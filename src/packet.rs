//! Wire-format definitions for protocol messages.
//!
//! Every datagram exchanged between peers carries exactly one [`Packet`],
//! serialised as a JSON object tagged by its `type` field:
//!
//! | type   | fields                                   | meaning                        |
//! |--------|------------------------------------------|--------------------------------|
//! | `data` | `seq: [start, end]`, `id`, `payload`     | one segment of the stream      |
//! | `ack`  | `sacks: [[start, end], ...]`, `id`       | selective acknowledgement      |
//! | `fin`  | (none)                                   | termination / termination ack  |
//!
//! No I/O happens here; this is pure data transformation plus the
//! validation a receiver needs before trusting a datagram.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of stream units carried by one `data` packet.
pub const MAX_PAYLOAD_SIZE: usize = 1200;

/// Maximum size of one serialised datagram, JSON framing included.
pub const MAX_PACKET_SIZE: usize = 1500;

// ---------------------------------------------------------------------------
// SeqRange
// ---------------------------------------------------------------------------

/// Half-open range `[start, end)` of absolute stream offsets.
///
/// On the wire this is a two-element array `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(u64, u64)", into = "(u64, u64)")]
pub struct SeqRange {
    pub start: u64,
    pub end: u64,
}

impl SeqRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of stream units covered (zero for an inverted range).
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl From<(u64, u64)> for SeqRange {
    fn from((start, end): (u64, u64)) -> Self {
        Self { start, end }
    }
}

impl From<SeqRange> for (u64, u64) {
    fn from(r: SeqRange) -> Self {
        (r.start, r.end)
    }
}

impl std::fmt::Display for SeqRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One protocol datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Packet {
    /// One segment of the stream.
    Data {
        seq: SeqRange,
        id: u64,
        payload: String,
    },
    /// Acknowledgement ranges for the data packet with the same `id`.
    Ack { sacks: Vec<SeqRange>, id: u64 },
    /// Termination signal; the receiver answers with the same shape.
    Fin,
}

impl Packet {
    /// Build an ack, coalescing its ranges if the literal list would not fit
    /// in one datagram.
    pub fn ack(sacks: Vec<SeqRange>, id: u64) -> Self {
        let packet = Packet::Ack { sacks, id };
        if packet.encoded_len() <= MAX_PACKET_SIZE {
            return packet;
        }
        match packet {
            Packet::Ack { sacks, id } => Packet::Ack {
                sacks: coalesce_ranges(sacks),
                id,
            },
            other => other,
        }
    }

    /// Serialise into a datagram.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(PacketError::Oversized(bytes.len()));
        }
        Ok(bytes)
    }

    /// Parse and validate a datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() > MAX_PACKET_SIZE {
            return Err(PacketError::Oversized(buf.len()));
        }
        let packet: Packet = serde_json::from_slice(buf)?;
        packet.validate()?;
        Ok(packet)
    }

    fn validate(&self) -> Result<(), PacketError> {
        match self {
            Packet::Data { seq, payload, .. } => {
                check_range(*seq)?;
                let len = payload.chars().count();
                if len > MAX_PAYLOAD_SIZE {
                    return Err(PacketError::PayloadTooLarge(len));
                }
                if len as u64 != seq.len() {
                    return Err(PacketError::LengthMismatch {
                        range: *seq,
                        payload_len: len,
                    });
                }
                Ok(())
            }
            Packet::Ack { sacks, .. } => sacks.iter().copied().try_for_each(check_range),
            Packet::Fin => Ok(()),
        }
    }

    fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map_or(usize::MAX, |b| b.len())
    }

    /// Short name of the packet type, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Data { .. } => "data",
            Packet::Ack { .. } => "ack",
            Packet::Fin => "fin",
        }
    }
}

fn check_range(range: SeqRange) -> Result<(), PacketError> {
    if range.start > range.end {
        return Err(PacketError::InvertedRange(range));
    }
    Ok(())
}

/// Merge overlapping or touching ranges into the smallest sorted set
/// covering the same offsets.
pub fn coalesce_ranges(mut ranges: Vec<SeqRange>) -> Vec<SeqRange> {
    ranges.sort_unstable();
    let mut merged: Vec<SeqRange> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match merged.last_mut() {
            Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
            _ => merged.push(r),
        }
    }
    merged
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a datagram is rejected. All of them are recoverable: the caller
/// drops the datagram and keeps going.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("datagram of {0} bytes exceeds the {max}-byte limit", max = MAX_PACKET_SIZE)]
    Oversized(usize),
    #[error("malformed packet: {0}")]
    Json(#[from] serde_json::Error),
    #[error("range {0} ends before it starts")]
    InvertedRange(SeqRange),
    #[error("payload of {0} units exceeds the {max}-unit limit", max = MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(usize),
    #[error("range {range} does not match payload length {payload_len}")]
    LengthMismatch { range: SeqRange, payload_len: usize },
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
