//! Connection lifecycle state and reconnect backoff
//!
//! Single responsibility: Name the lifecycle states and compute the delay
//! schedule between reconnect attempts. No I/O.

use std::time::Duration;

/// Lifecycle of the one logical connection.
///
/// `Closing` is entered only by explicit `disconnect()`; it is the clean
/// shutdown path and suppresses automatic reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    pub fn is_connecting(self) -> bool {
        self == ConnectionState::Connecting
    }
}

/// Double-and-cap reconnect schedule.
///
/// The delay before attempt `k+1` is `min(delay(k) * 2, cap)`; the
/// attempt counter strictly increases and the schedule is exhausted once
/// it exceeds the configured maximum.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    max_attempts: u32,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            cap,
            max_attempts,
            current: initial,
            attempts: 0,
        }
    }

    /// The delay to wait before the next attempt, or `None` once the
    /// attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A successful open resets the schedule.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap() {
        let mut backoff = Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            10,
        );
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30, 30, 30]);
        assert_eq!(backoff.attempts(), 10);
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn attempts_strictly_increase() {
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            3,
        );
        let mut last = 0;
        while backoff.next_delay().is_some() {
            assert!(backoff.attempts() > last);
            last = backoff.attempts();
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn reset_restores_the_schedule() {
        let mut backoff = Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            5,
        );
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn zero_attempts_never_schedules() {
        let mut backoff = Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            0,
        );
        assert!(backoff.next_delay().is_none());
    }
}
