use std::time::{Duration, Instant};

/// Outcome of a send attempt against the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Idle window: send immediately (leading edge).
    SendNow,
    /// Inside the window: hold the payload and flush after this delay.
    /// Only the most recent held payload survives; older ones are replaced,
    /// never queued.
    Defer(Duration),
}

/// Timing core of the throttled broadcast emitter: at most one send per
/// `min_interval` per sender. The async driver owns the single pending
/// payload and the trailing-edge flush timer; this type only decides.
#[derive(Debug)]
pub struct ThrottleGate {
    min_interval: Duration,
    last_sent: Option<Instant>,
}

impl ThrottleGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: None,
        }
    }

    /// Record a send attempt at `now`.
    pub fn poll(&mut self, now: Instant) -> ThrottleDecision {
        match self.last_sent {
            Some(last) if now.duration_since(last) < self.min_interval => {
                ThrottleDecision::Defer(self.min_interval - now.duration_since(last))
            }
            _ => {
                self.last_sent = Some(now);
                ThrottleDecision::SendNow
            }
        }
    }

    /// Record the trailing-edge flush so the next attempt measures from it.
    pub fn mark_flushed(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Forget history, e.g. on a round transition.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}
