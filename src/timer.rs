//! The connection-wide acknowledgement deadline.
//!
//! There is one deadline per connection, not one per segment.  It is
//! re-armed after every ack the client receives; when it expires without an
//! ack the client calls [`crate::sender::Sender::timeout`].
//!
//! By default the deadline is a fixed 500 ms and repeated expiries are not
//! distinguished.  Two optional refinements sit on top:
//! - exponential back-off, doubling the deadline per consecutive expiry up
//!   to `max_timeout`;
//! - a ceiling on consecutive expiries after which the client gives up.

use std::time::Duration;

/// Default ack deadline.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Adjustable timeout parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Deadline after each ack (and the starting deadline).
    pub ack_timeout: Duration,
    /// Double the deadline on each consecutive expiry.
    pub backoff: bool,
    /// Upper bound for the backed-off deadline.
    pub max_timeout: Duration,
    /// Give up after this many consecutive expiries (`None` = never).
    pub max_consecutive_timeouts: Option<u32>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            backoff: false,
            max_timeout: Duration::from_secs(10),
            max_consecutive_timeouts: None,
        }
    }
}

/// A running ack deadline for one connection.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    config: TimerConfig,
    current: Duration,
    consecutive: u32,
    total: u64,
}

impl RetransmitTimer {
    pub fn new(config: TimerConfig) -> Self {
        let current = config.ack_timeout;
        Self {
            config,
            current,
            consecutive: 0,
            total: 0,
        }
    }

    /// How long to wait for the next ack.
    pub fn deadline(&self) -> Duration {
        self.current
    }

    /// An ack arrived: restore the base deadline.
    pub fn on_ack(&mut self) {
        self.consecutive = 0;
        self.current = self.config.ack_timeout;
    }

    /// The deadline expired.
    ///
    /// Returns `false` once the configured ceiling of consecutive expiries
    /// has been exceeded.
    pub fn on_timeout(&mut self) -> bool {
        self.consecutive += 1;
        self.total += 1;
        if self.config.backoff {
            self.current = (self.current * 2).min(self.config.max_timeout);
        }
        match self.config.max_consecutive_timeouts {
            Some(limit) => self.consecutive <= limit,
            None => true,
        }
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive
    }

    pub fn total_timeouts(&self) -> u64 {
        self.total
    }
}

impl Default for RetransmitTimer {
    fn default() -> Self {
        Self::new(TimerConfig::default())
    }
}
