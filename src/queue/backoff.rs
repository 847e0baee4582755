//! Reconnect backoff
//!
//! Delay sequence for WebSocket reconnect attempts: the configured
//! minimum wait doubles on every failed attempt up to the configured
//! repeat count, with uniform random jitter added on top.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    wait_minimum: u64,
    repeat_times: u32,
    random_range: u64,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(wait_minimum: i32, repeat_times: i32, random_range: i32) -> Self {
        Self {
            wait_minimum: wait_minimum.max(1) as u64,
            repeat_times: repeat_times.max(0) as u32,
            random_range: random_range.max(0) as u64,
            attempt: 0,
        }
    }

    /// Delay before the next connection attempt.
    pub fn next_delay(&mut self) -> Duration {
        let doublings = self.attempt.min(self.repeat_times);
        self.attempt = self.attempt.saturating_add(1);
        let base = self.wait_minimum.saturating_mul(1u64 << doublings.min(16));
        let jitter = if self.random_range > 0 {
            rand::thread_rng().gen_range(0..=self.random_range)
        } else {
            0
        };
        Duration::from_secs(base + jitter)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_repeat_cap() {
        let mut backoff = ReconnectBackoff::new(3, 2, 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_secs(6));
        assert_eq!(backoff.next_delay(), Duration::from_secs(12));
        // capped after repeat_times doublings
        assert_eq!(backoff.next_delay(), Duration::from_secs(12));
    }

    #[test]
    fn jitter_stays_in_range() {
        let mut backoff = ReconnectBackoff::new(3, 0, 10);
        for _ in 0..50 {
            let delay = backoff.next_delay().as_secs();
            assert!((3..=13).contains(&delay));
        }
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = ReconnectBackoff::new(5, 3, 0);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }
}
