//! Reconnection Scheduler
//!
//! Exponential backoff between reconnect attempts: 1s, 2s, 4s ... capped at
//! 30s. At most one timer may be armed at a time.

use std::time::Duration;

/// Backoff state driven by the link's processing task
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    delay: Duration,
    armed: bool,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            delay: initial,
            armed: false,
        }
    }

    /// Delay the next attempt will wait
    pub fn current(&self) -> Duration {
        self.delay
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Arm the timer after a transport loss
    ///
    /// Returns `None` when a timer is already pending; the loss is ignored.
    pub fn arm(&mut self) -> Option<Duration> {
        if self.armed {
            return None;
        }
        self.armed = true;
        Some(self.delay)
    }

    /// The armed timer elapsed and an attempt is being made
    pub fn fire(&mut self) {
        self.armed = false;
        self.delay = (self.delay * 2).min(self.max);
    }

    /// A transport opened: the network path works again
    pub fn reset(&mut self) {
        self.delay = self.initial;
    }

    /// Disarm without counting an attempt (forced reconnect, shutdown)
    pub fn cancel(&mut self) {
        self.armed = false;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(30_000))
    }
}
