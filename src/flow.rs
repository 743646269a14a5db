//! # Flow Control
//!
//! Credit-based flow control at two levels: per stream and for the whole
//! connection. Senders track an offset-used against the peer's announced
//! limit; receivers validate incoming offsets against their own announced
//! limit and raise it as the application consumes data.
//!
//! Announced limits are monotonic in both directions: a lower or
//! duplicate limit is suppressed, never applied and never sent.

#![forbid(unsafe_code)]

use crate::error::{Error, Result};

/// Send-side window: bytes we may put on the wire
///
/// `sent` never exceeds `limit`; the limit only moves up, via
/// MAX_DATA / MAX_STREAM_DATA from the peer.
#[derive(Debug, Clone)]
pub struct SendWindow {
    sent: u64,
    limit: u64,
    /// Limit value a blocked frame was already emitted for
    blocked_signaled: Option<u64>,
}

impl SendWindow {
    /// Create a window with the peer's initial limit
    pub fn new(initial_limit: u64) -> Self {
        Self {
            sent: 0,
            limit: initial_limit,
            blocked_signaled: None,
        }
    }

    /// Bytes that may still be sent
    pub fn available(&self) -> u64 {
        self.limit - self.sent
    }

    /// Check whether `n` more bytes fit in the window
    pub fn can_send(&self, n: u64) -> bool {
        n <= self.available()
    }

    /// Consume send credit
    pub fn record_sent(&mut self, n: u64) {
        debug_assert!(n <= self.available());
        self.sent += n;
    }

    /// Offset-used so far
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Current announced limit
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Apply a limit from the peer; non-increasing values are ignored
    ///
    /// Returns true when the window actually grew (blocked writers can
    /// resume).
    pub fn update_limit(&mut self, limit: u64) -> bool {
        if limit > self.limit {
            self.limit = limit;
            true
        } else {
            false
        }
    }

    /// Limit to report in a blocked frame, at most once per limit value
    pub fn blocked_signal(&mut self) -> Option<u64> {
        if self.available() == 0 && self.blocked_signaled != Some(self.limit) {
            self.blocked_signaled = Some(self.limit);
            Some(self.limit)
        } else {
            None
        }
    }
}

/// Receive-side window: bytes the peer may send us
///
/// Stream-level users validate offsets against the limit; the
/// connection-level user charges unique received bytes instead, since
/// offsets are per-stream. Both raise the announced limit once consumed
/// bytes cross the update threshold.
#[derive(Debug, Clone)]
pub struct RecvWindow {
    /// Currently announced limit
    limit: u64,
    /// Window size added on every raise
    window: u64,
    /// Unique bytes charged (connection-level accounting)
    charged: u64,
    /// Bytes consumed by the application
    consumed: u64,
    /// Remaining credit at or below which the limit is raised
    update_at: u64,
}

impl RecvWindow {
    /// Create a window of `window` bytes raised at `threshold` consumption
    pub fn new(window: u64, threshold: f64) -> Self {
        Self {
            limit: window,
            window,
            charged: 0,
            consumed: 0,
            update_at: (window as f64 * (1.0 - threshold)) as u64,
        }
    }

    /// Current announced limit
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Validate that data ending at `end` stays within the limit
    ///
    /// State is untouched on failure.
    pub fn check_offset(&self, end: u64) -> Result<()> {
        if end > self.limit {
            Err(Error::FlowControlViolation)
        } else {
            Ok(())
        }
    }

    /// Charge `n` unique new bytes against the window
    ///
    /// Fails without charging when the limit would be exceeded.
    pub fn try_charge(&mut self, n: u64) -> Result<()> {
        if self.charged + n > self.limit {
            return Err(Error::FlowControlViolation);
        }
        self.charged += n;
        Ok(())
    }

    /// Record bytes handed to the application
    pub fn on_consumed(&mut self, n: u64) {
        self.consumed += n;
    }

    /// Raise the announced limit once enough has been consumed
    ///
    /// Returns the new limit to announce, or None while the remaining
    /// credit is still above the threshold. Successive raises are
    /// strictly increasing, so a returned value is never a duplicate.
    pub fn maybe_increase(&mut self) -> Option<u64> {
        if self.limit - self.consumed <= self.update_at {
            self.limit = self.consumed + self.window;
            Some(self.limit)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod send_window_tests {
        use super::*;

        #[test]
        fn test_send_accounting() {
            let mut w = SendWindow::new(100);
            assert_eq!(w.available(), 100);
            assert!(w.can_send(100));
            assert!(!w.can_send(101));

            w.record_sent(60);
            assert_eq!(w.available(), 40);
            assert_eq!(w.sent(), 60);
        }

        #[test]
        fn test_limit_monotonic() {
            let mut w = SendWindow::new(100);
            assert!(w.update_limit(200));
            assert!(!w.update_limit(150), "lower limit must be ignored");
            assert!(!w.update_limit(200), "duplicate limit must be ignored");
            assert_eq!(w.limit(), 200);
        }

        #[test]
        fn test_blocked_signal_once_per_limit() {
            let mut w = SendWindow::new(10);
            assert_eq!(w.blocked_signal(), None, "not blocked yet");

            w.record_sent(10);
            assert_eq!(w.blocked_signal(), Some(10));
            assert_eq!(w.blocked_signal(), None, "already signaled for this limit");

            w.update_limit(20);
            w.record_sent(10);
            assert_eq!(w.blocked_signal(), Some(20), "new limit, new signal");
        }
    }

    mod recv_window_tests {
        use super::*;

        #[test]
        fn test_offset_check_leaves_state_unchanged() {
            let w = RecvWindow::new(100, 0.5);
            assert!(w.check_offset(100).is_ok());
            assert_eq!(w.check_offset(101), Err(Error::FlowControlViolation));
            assert_eq!(w.limit(), 100);
        }

        #[test]
        fn test_charge_rejects_overrun() {
            let mut w = RecvWindow::new(100, 0.5);
            w.try_charge(90).unwrap();
            assert_eq!(w.try_charge(11), Err(Error::FlowControlViolation));
            // Failed charge must not consume credit
            w.try_charge(10).unwrap();
        }

        #[test]
        fn test_window_raises_after_threshold() {
            let mut w = RecvWindow::new(100, 0.5);
            w.try_charge(100).unwrap();

            w.on_consumed(40);
            assert_eq!(w.maybe_increase(), None, "below threshold");

            w.on_consumed(20);
            assert_eq!(w.maybe_increase(), Some(160));
            assert_eq!(w.maybe_increase(), None, "no duplicate announcement");

            w.try_charge(60).unwrap();
            w.on_consumed(60);
            assert_eq!(w.maybe_increase(), Some(220));
        }

        #[test]
        fn test_announced_limits_strictly_increase() {
            let mut w = RecvWindow::new(64, 0.5);
            let mut last = w.limit();
            for _ in 0..10 {
                w.on_consumed(48);
                if let Some(limit) = w.maybe_increase() {
                    assert!(limit > last, "announcement went backwards");
                    last = limit;
                }
            }
        }
    }
}
