//! Outbound segment state for selective-acknowledgement reliability.
//!
//! [`Sender`] decides which range of the stream to (re)transmit next and
//! tracks which segment starts have been confirmed by the peer.  It does
//! **not** touch the socket; [`crate::client::Client`] calls these methods
//! and owns the actual send/receive loop.
//!
//! # Contract
//! - Every segment start ever handed out is in exactly one of
//!   `acknowledged` / `unacknowledged`.
//! - Segment starts are multiples of `max_payload_size`; only the last
//!   segment of the stream may be shorter.
//! - On timeout, `next_offset` rewinds to the oldest unacknowledged start
//!   (go-back-N); already-acknowledged starts are skipped when resending.
//! - No window limit is enforced here; the caller budgets in-flight data.

use std::collections::BTreeSet;
use std::num::NonZeroU64;

use crate::packet::{SeqRange, MAX_PAYLOAD_SIZE};
use crate::state::SenderPhase;

const DEFAULT_PAYLOAD_SIZE: NonZeroU64 = match NonZeroU64::new(MAX_PAYLOAD_SIZE as u64) {
    Some(size) => size,
    None => panic!("MAX_PAYLOAD_SIZE must be non-zero"),
};

/// What [`Sender::send`] wants the caller to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Transmit this range of the stream.
    Segment(SeqRange),
    /// Nothing to transmit right now; wait for an ack or a timeout.
    Stalled,
    /// Every segment has been acknowledged.
    Complete,
}

/// Result of processing one ack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckOutcome {
    /// Segment starts that moved from unacknowledged to acknowledged.
    pub segments: usize,
    /// Stream units covered by those segments.
    pub bytes: u64,
}

/// Send-side state for one connection.
#[derive(Debug)]
pub struct Sender {
    total_length: u64,
    max_payload_size: u64,

    /// Start of the next range to hand out. Rewound by [`Sender::timeout`].
    next_offset: u64,

    acknowledged: BTreeSet<u64>,
    unacknowledged: BTreeSet<u64>,

    /// Highest segment end ever handed out; anything below it is a resend.
    high_water: u64,
    segments_sent: u64,
    retransmissions: u64,
}

impl Sender {
    /// Create a sender for a stream of `total_length` units using the
    /// protocol's [`MAX_PAYLOAD_SIZE`].
    pub fn new(total_length: u64) -> Self {
        Self::with_payload_size(total_length, DEFAULT_PAYLOAD_SIZE)
    }

    pub fn with_payload_size(total_length: u64, max_payload_size: NonZeroU64) -> Self {
        Self {
            total_length,
            max_payload_size: max_payload_size.get(),
            next_offset: 0,
            acknowledged: BTreeSet::new(),
            unacknowledged: BTreeSet::new(),
            high_water: 0,
            segments_sent: 0,
            retransmissions: 0,
        }
    }

    /// Pick the next range to transmit.
    ///
    /// Once the cursor has passed the end of the stream while segments are
    /// still unacknowledged, this rewinds via [`Sender::timeout`] and reports
    /// [`SendOutcome::Stalled`]; the following call starts retransmitting
    /// from the oldest gap.
    pub fn send(&mut self) -> SendOutcome {
        if self.next_offset >= self.total_length {
            if self.unacknowledged.is_empty() {
                return SendOutcome::Complete;
            }
            self.timeout();
            return SendOutcome::Stalled;
        }

        while self.acknowledged.contains(&self.next_offset) {
            self.next_offset = (self.next_offset + self.max_payload_size).min(self.total_length);
        }

        let end = (self.next_offset + self.max_payload_size).min(self.total_length);
        if end == self.next_offset {
            // Zero-length window: everything from the cursor on is confirmed.
            return if self.unacknowledged.is_empty() {
                SendOutcome::Complete
            } else {
                SendOutcome::Stalled
            };
        }

        let range = SeqRange::new(self.next_offset, end);
        self.unacknowledged.insert(range.start);
        self.next_offset = end;

        self.segments_sent += 1;
        if range.start < self.high_water {
            self.retransmissions += 1;
        }
        self.high_water = self.high_water.max(end);

        SendOutcome::Segment(range)
    }

    /// Process the ranges carried by one ack.
    ///
    /// Within each range, the starts `start, start + max_payload_size, ...`
    /// below `end` that are still unacknowledged become acknowledged.
    /// `packet_id` is only used for tracing.
    pub fn ack_packet(&mut self, ack_ranges: &[SeqRange], packet_id: u64) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        for range in ack_ranges {
            let end = range.end.min(self.total_length);
            if range.start >= end {
                continue;
            }
            let confirmed: Vec<u64> = self
                .unacknowledged
                .range(range.start..end)
                .copied()
                .filter(|offset| (offset - range.start) % self.max_payload_size == 0)
                .collect();
            for offset in confirmed {
                self.unacknowledged.remove(&offset);
                self.acknowledged.insert(offset);
                outcome.segments += 1;
                outcome.bytes += self.segment_len(offset);
            }
            log::trace!("[sender] ack id={packet_id} range={range}");
        }
        outcome
    }

    /// Rewind the cursor to the oldest unacknowledged start.
    ///
    /// Leaves both offset sets untouched; the next [`Sender::send`] skips
    /// whatever was acknowledged in the meantime.
    pub fn timeout(&mut self) {
        if let Some(&oldest) = self.unacknowledged.first() {
            self.next_offset = self.next_offset.min(oldest);
        }
    }

    pub fn phase(&self) -> SenderPhase {
        if self.next_offset >= self.total_length && self.unacknowledged.is_empty() {
            SenderPhase::Done
        } else {
            SenderPhase::Active
        }
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Number of segments sent but not yet confirmed.
    pub fn in_flight(&self) -> usize {
        self.unacknowledged.len()
    }

    pub fn is_acknowledged(&self, offset: u64) -> bool {
        self.acknowledged.contains(&offset)
    }

    pub fn segments_sent(&self) -> u64 {
        self.segments_sent
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    fn segment_len(&self, start: u64) -> u64 {
        (start + self.max_payload_size).min(self.total_length) - start
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
