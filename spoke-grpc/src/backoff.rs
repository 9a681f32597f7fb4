//! Exponential reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Doubling backoff between a floor and a cap, with ±20% jitter so a fleet
/// of clients does not reconnect in lockstep.
#[derive(Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(Duration::from_millis(1));
        Self {
            min,
            max: max.max(min),
            next: min,
        }
    }

    /// The delay to sleep before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = (base * 2).min(self.max);
        jitter(base)
    }

    /// Back to the floor, after a session proved healthy.
    pub fn reset(&mut self) {
        self.next = self.min;
    }
}

fn jitter(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(30));
        let mut bases = Vec::new();
        for _ in 0..12 {
            bases.push(backoff.next_delay());
        }
        // Every delay stays inside the jittered cap.
        for delay in &bases {
            assert!(*delay <= Duration::from_secs(36));
        }
        // The tail has reached the cap region.
        assert!(*bases.last().unwrap() >= Duration::from_secs(24));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        for _ in 0..100 {
            let jittered = jitter(Duration::from_secs(10));
            assert!(jittered >= Duration::from_secs(8));
            assert!(jittered <= Duration::from_secs(12));
        }
    }

    #[test]
    fn reset_returns_to_the_floor() {
        let mut backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(30));
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_millis(240));
    }
}
