//! Reconnect backoff.
//!
//! Exponential growth with a cap and ±25% jitter so reconnecting producers
//! don't stampede a recovering broker.

use rand::Rng;
use std::time::Duration;

const DEFAULT_MULTIPLIER: f64 = 2.0;

#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: DEFAULT_MULTIPLIER,
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.initial.as_millis() as f64 * self.multiplier.powi(self.attempt as i32);
        let capped = base.min(self.max.as_millis() as f64);

        // ±25% jitter
        let jitter = (rand::thread_rng().gen::<f64>() * 0.5 - 0.25) * capped;
        let delay = (capped + jitter).max(0.0);

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay as u64)
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
    fn grows_exponentially() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60));

        let first = backoff.next_delay();
        assert!(first.as_millis() >= 75 && first.as_millis() <= 125);

        let second = backoff.next_delay();
        assert!(second.as_millis() >= 150 && second.as_millis() <= 250);
    }

    #[test]
    fn respects_cap() {
        let max = Duration::from_secs(1);
        let mut backoff = Backoff::new(Duration::from_millis(100), max);

        for _ in 0..20 {
            let delay = backoff.next_delay();
            // cap + max jitter
            assert!(delay <= max + Duration::from_millis(250));
        }
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60));
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        let delay = backoff.next_delay();
        assert!(delay.as_millis() <= 125);
    }
}
