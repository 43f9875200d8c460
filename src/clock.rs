//! Monotonic time and jittered election deadlines.

use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};

/// Wraps `Instant::now()` plus a seeded RNG for election jitter, so tests can
/// swap in a deterministic clock without touching the state machine.
pub struct Clock {
    election_timeout: Duration,
    heartbeat_interval: Duration,
    rng: SmallRng,
}

impl Clock {
    pub fn new(election_timeout: Duration, heartbeat_interval: Duration) -> Result<Self> {
        if election_timeout.is_zero() {
            return Err(Error::ConfigInvalid("election_timeout must be > 0".into()));
        }
        if heartbeat_interval * 2 >= election_timeout {
            return Err(Error::ConfigInvalid(
                "heartbeat_interval must be < election_timeout / 2".into(),
            ));
        }
        Ok(Self {
            election_timeout,
            heartbeat_interval,
            rng: SmallRng::from_entropy(),
        })
    }

    pub fn now(&self) -> Instant {
        Instant::now()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// `now + U[T, 2T]`, T being the configured election timeout.
    pub fn next_election_deadline(&mut self, now: Instant) -> Instant {
        let min = self.election_timeout.as_millis() as u64;
        let max = (self.election_timeout * 2).as_millis() as u64;
        let jitter_ms = self.rng.gen_range(min..=max);
        now + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_election_timeout() {
        assert!(Clock::new(Duration::ZERO, Duration::from_millis(100)).is_err());
    }

    #[test]
    fn rejects_heartbeat_too_close_to_election_timeout() {
        assert!(Clock::new(Duration::from_secs(5), Duration::from_secs(3)).is_err());
    }

    #[test]
    fn deadline_is_within_one_to_two_times_timeout() {
        let mut clock = Clock::new(Duration::from_secs(5), Duration::from_secs(1)).unwrap();
        let now = clock.now();
        for _ in 0..100 {
            let deadline = clock.next_election_deadline(now);
            assert!(deadline >= now + Duration::from_secs(5));
            assert!(deadline <= now + Duration::from_secs(10));
        }
    }
}
