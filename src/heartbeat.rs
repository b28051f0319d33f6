//! Heartbeat bookkeeping shared by the main and voice gateways.
//!
//! Both gateways drive a [`HeartbeatState`] from their own timers, passing in the current
//! [`Instant`] so the acknowledgement rules can be exercised without sockets or sleeping.
use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// What a gateway should do when its heartbeat timer fires.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Beat {
    /// Send the next heartbeat. It has already been recorded as unacknowledged.
    Send,
    /// The connection stopped acknowledging heartbeats: tear it down and reconnect.
    Dead,
    /// The connection was already declared dead, and a reconnect is in progress.
    AlreadyDead,
}

#[derive(Clone, Debug)]
pub struct HeartbeatState {
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
    missed: u32,
    latency: Option<Duration>,
    max_missed: u32,
    ack_timeout: Option<Duration>,
    dead: bool,
}

impl HeartbeatState {
    /// Creates a tracker which tolerates `max_missed` outstanding heartbeats when the timer
    /// fires, and (if set) acknowledged round trips of at most `ack_timeout`.
    ///
    /// Unacknowledged heartbeats are only judged by `max_missed`.
    #[must_use]
    pub fn new(max_missed: u32, ack_timeout: Option<Duration>) -> Self {
        Self {
            last_sent: None,
            last_ack: None,
            missed: 0,
            latency: None,
            max_missed,
            ack_timeout,
            dead: false,
        }
    }

    /// Handles a heartbeat timer tick.
    ///
    /// Returns [`Beat::Dead`] exactly once per connection; later ticks return
    /// [`Beat::AlreadyDead`] until [`Self::reset`] is called.
    pub fn tick(&mut self, now: Instant) -> Beat {
        if self.dead {
            return Beat::AlreadyDead;
        }

        let stale = self
            .ack_timeout
            .is_some_and(|limit| self.latency.is_some_and(|rtt| rtt > limit));

        if self.missed > self.max_missed || stale {
            debug!(
                "Heartbeat dead: {} unacknowledged, latency {:?}.",
                self.missed, self.latency
            );
            self.dead = true;
            return Beat::Dead;
        }

        self.last_sent = Some(now);
        self.missed += 1;

        Beat::Send
    }

    /// Records an acknowledgement, returning the round-trip time to the last heartbeat.
    pub fn ack(&mut self, now: Instant) -> Option<Duration> {
        self.last_ack = Some(now);
        self.missed = 0;
        self.latency = self.last_sent.map(|sent| now.saturating_duration_since(sent));

        trace!("Heartbeat ack, latency {:?}.", self.latency);

        self.latency
    }

    /// Clears all state for a fresh connection.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_missed, self.ack_timeout);
    }

    /// Round-trip time of the most recently acknowledged heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    #[must_use]
    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    #[must_use]
    pub fn last_ack(&self) -> Option<Instant> {
        self.last_ack
    }

    /// Number of heartbeats sent since the last acknowledgement.
    #[must_use]
    pub fn missed(&self) -> u32 {
        self.missed
    }

    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.dead
    }
}
