use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// What a heartbeat tick should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// Nothing has been received for longer than the staleness threshold
    Stale { idle: Duration },
    /// Connection looks healthy, send a heartbeat request
    Ping,
    /// Between connections and not yet stale, only keep the timer running
    Wait,
}

/// Tracks when the last inbound frame arrived.
#[derive(Debug, Clone)]
pub(crate) struct Liveness {
    stale_timeout: Duration,
    last_received: Instant,
    last_received_at: Option<DateTime<Utc>>,
}

impl Liveness {
    pub(crate) fn new(stale_timeout: Duration) -> Self {
        Self {
            stale_timeout,
            last_received: Instant::now(),
            last_received_at: None,
        }
    }

    /// Record that a frame arrived (or that a connection was just opened).
    pub(crate) fn touch(&mut self) {
        self.last_received = Instant::now();
        self.last_received_at = Some(Utc::now());
    }

    /// Wall-clock time of the last received frame, `None` before the first connection.
    pub(crate) fn last_received_at(&self) -> Option<DateTime<Utc>> {
        self.last_received_at
    }

    /// Staleness is judged first, whether or not a socket is currently up.
    pub(crate) fn check(&self, now: Instant, connected: bool) -> Tick {
        let idle = now.saturating_duration_since(self.last_received);
        if idle > self.stale_timeout {
            Tick::Stale { idle }
        } else if connected {
            Tick::Ping
        } else {
            Tick::Wait
        }
    }
}
