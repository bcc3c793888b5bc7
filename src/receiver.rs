//! Inbound segment reassembly.
//!
//! The [`Receiver`] sits between a decoded `data` packet and the application:
//! - Segments that start at the cursor are delivered at once, together with
//!   any buffered segments they make contiguous.
//! - Segments that arrive ahead of the cursor wait in an ordered buffer.
//! - Segments that start below the cursor are stale: they are acknowledged
//!   up to the cursor and otherwise ignored.
//!
//! Every call returns the acknowledgement ranges to send back; the
//! [`Receiver`] does **not** send them itself ([`crate::server::Server`]
//! does).

use std::collections::BTreeMap;

use crate::packet::SeqRange;

/// Receive-side state for one peer.
#[derive(Debug, Default)]
pub struct Receiver {
    /// Every unit below this offset has been delivered, exactly once.
    expected_offset: u64,

    /// Segments that arrived ahead of the cursor, keyed by start offset.
    /// Never holds `expected_offset` between calls.
    pending: BTreeMap<u64, String>,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one segment.
    ///
    /// Returns the ranges to acknowledge and the text that became
    /// deliverable in order (possibly empty).  The first range always
    /// echoes `seq_range`; for a stale segment it is widened to end at the
    /// cursor instead.  After it come the ranges of everything this segment
    /// made contiguous.
    pub fn data_packet(&mut self, seq_range: SeqRange, payload: String) -> (Vec<SeqRange>, String) {
        if seq_range.start < self.expected_offset {
            return (
                vec![SeqRange::new(seq_range.start, self.expected_offset)],
                String::new(),
            );
        }

        self.pending.insert(seq_range.start, payload);
        let mut ack_ranges = vec![seq_range];

        let mut ready = String::new();
        while let Some(segment) = self.pending.remove(&self.expected_offset) {
            let next = self.expected_offset + segment.chars().count() as u64;
            ack_ranges.push(SeqRange::new(self.expected_offset, next));
            ready.push_str(&segment);
            self.expected_offset = next;
        }

        (ack_ranges, ready)
    }

    /// Report whether everything received was delivered.
    ///
    /// A non-empty buffer means a gap was never filled; that is logged as a
    /// warning and reported as `false`, never treated as fatal.
    pub fn finish(&self) -> bool {
        if self.pending.is_empty() {
            log::info!(
                "[receiver] all data received and delivered ({} units)",
                self.expected_offset
            );
            true
        } else {
            let first = self.pending.keys().next().copied().unwrap_or_default();
            log::warn!(
                "[receiver] not all data was delivered: {} segment(s) buffered past a gap at {} (first buffered at {})",
                self.pending.len(),
                self.expected_offset,
                first
            );
            false
        }
    }

    pub fn expected_offset(&self) -> u64 {
        self.expected_offset
    }

    /// Number of segments buffered ahead of the cursor.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: u64, end: u64) -> SeqRange {
        SeqRange::new(start, end)
    }

    fn chunk(c: char, n: usize) -> String {
        std::iter::repeat(c).take(n).collect()
    }

    #[test]
    fn in_order_segment_is_delivered() {
        let mut rx = Receiver::new();
        let (acks, ready) = rx.data_packet(r(0, 5), "hello".into());
        assert_eq!(acks, vec![r(0, 5), r(0, 5)]);
        assert_eq!(ready, "hello");
        assert_eq!(rx.expected_offset(), 5);
        assert_eq!(rx.pending_len(), 0);
    }

    #[test]
    fn reordered_arrival_drains_buffer() {
        let a = chunk('a', 1200);
        let b = chunk('b', 1200);
        let mut rx = Receiver::new();

        let (acks, ready) = rx.data_packet(r(1200, 2400), b.clone());
        assert_eq!(acks, vec![r(1200, 2400)]);
        assert_eq!(ready, "");
        assert_eq!(rx.pending_len(), 1);

        let (acks, ready) = rx.data_packet(r(0, 1200), a.clone());
        assert_eq!(acks, vec![r(0, 1200), r(0, 1200), r(1200, 2400)]);
        assert_eq!(ready, a + &b);
        assert_eq!(rx.expected_offset(), 2400);
        assert_eq!(rx.pending_len(), 0);
    }

    #[test]
    fn stale_segment_is_acked_up_to_cursor() {
        let mut rx = Receiver::new();
        rx.data_packet(r(0, 1200), chunk('a', 1200));
        assert_eq!(rx.expected_offset(), 1200);

        let (acks, ready) = rx.data_packet(r(0, 1200), chunk('a', 1200));
        assert_eq!(acks, vec![r(0, 1200)]);
        assert_eq!(ready, "");
    }

    #[test]
    fn stale_ack_echoes_request_start() {
        let mut rx = Receiver::new();
        rx.data_packet(r(0, 4), "abcd".into());
        rx.data_packet(r(4, 8), "efgh".into());

        let (acks, _) = rx.data_packet(r(4, 8), "efgh".into());
        assert_eq!(acks, vec![r(4, 8)]);
        let (acks, _) = rx.data_packet(r(0, 4), "abcd".into());
        assert_eq!(acks, vec![r(0, 8)]);
    }

    #[test]
    fn stale_handling_is_idempotent() {
        let mut rx = Receiver::new();
        rx.data_packet(r(0, 3), "abc".into());
        let first = rx.data_packet(r(0, 3), "abc".into());
        let second = rx.data_packet(r(0, 3), "abc".into());
        assert_eq!(first, second);
        assert_eq!(first.1, "");
    }

    #[test]
    fn duplicate_ahead_of_cursor_overwrites() {
        let mut rx = Receiver::new();
        rx.data_packet(r(3, 6), "def".into());
        let (acks, ready) = rx.data_packet(r(3, 6), "def".into());
        assert_eq!(acks, vec![r(3, 6)]);
        assert_eq!(ready, "");
        assert_eq!(rx.pending_len(), 1);
    }

    #[test]
    fn drain_stops_at_next_gap() {
        let mut rx = Receiver::new();
        rx.data_packet(r(2, 4), "cd".into());
        rx.data_packet(r(6, 8), "gh".into());

        let (acks, ready) = rx.data_packet(r(0, 2), "ab".into());
        assert_eq!(acks, vec![r(0, 2), r(0, 2), r(2, 4)]);
        assert_eq!(ready, "abcd");
        assert_eq!(rx.expected_offset(), 4);
        assert_eq!(rx.pending_len(), 1);
        assert!(!rx.finish());

        let (_, ready) = rx.data_packet(r(4, 6), "ef".into());
        assert_eq!(ready, "efgh");
        assert!(rx.finish());
    }

    #[test]
    fn cursor_counts_characters() {
        let mut rx = Receiver::new();
        let (acks, ready) = rx.data_packet(r(0, 3), "héé".into());
        assert_eq!(acks, vec![r(0, 3), r(0, 3)]);
        assert_eq!(ready, "héé");
        assert_eq!(rx.expected_offset(), 3);
    }

    #[test]
    fn delivers_every_unit_exactly_once_under_shuffle() {
        let text: String = (0..40u8).map(|i| (b'a' + i % 26) as char).collect();
        let segments: Vec<(SeqRange, String)> = (0..10u64)
            .map(|i| (r(i * 4, i * 4 + 4), text[(i * 4) as usize..(i * 4 + 4) as usize].to_string()))
            .collect();

        // Fixed permutation with duplicates and a stale replay.
        let order = [3, 1, 1, 0, 9, 2, 0, 5, 4, 8, 7, 6, 3, 9];
        let mut rx = Receiver::new();
        let mut delivered = String::new();
        for &i in &order {
            let (range, payload) = segments[i].clone();
            let (_, ready) = rx.data_packet(range, payload);
            delivered.push_str(&ready);
            assert_eq!(delivered, text[..rx.expected_offset() as usize]);
        }
        assert_eq!(delivered, text);
        assert!(rx.finish());
    }
}
