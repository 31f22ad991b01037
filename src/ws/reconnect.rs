use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;

use super::config::ReconnectConfig;

/// Outcome of recording a failed or forced-down connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retry {
    /// Try again after the given delay
    After(Duration),
    /// The retry budget is spent; the client must terminate
    Exhausted,
}

/// Attempt counter and backoff schedule for re-establishing the connection.
#[derive(Debug)]
pub(crate) struct ReconnectController {
    backoff: ExponentialBackoff,
    max_attempts: Option<u32>,
    max_backoff: Duration,
    attempts: u32,
    delay: Option<Duration>,
}

impl ReconnectController {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            max_backoff: config.max_backoff,
            backoff: config.into(),
            attempts: 0,
            delay: None,
        }
    }

    /// Consecutive failures since the last successful connect.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay of the currently scheduled retry, if any.
    pub(crate) fn delay(&self) -> Option<Duration> {
        self.delay
    }

    /// Record a connect failure or a forced disconnect.
    pub(crate) fn on_failure(&mut self) -> Retry {
        if self
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
        {
            self.delay = None;
            return Retry::Exhausted;
        }

        self.attempts = self.attempts.saturating_add(1);
        let delay = self.backoff.next_backoff().unwrap_or(self.max_backoff);
        self.delay = Some(delay);
        Retry::After(delay)
    }

    /// Record a successful connect.
    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
        self.delay = None;
        self.backoff.reset();
    }
}
