//! Utility functions and helpers

use std::time::Duration;

/// Format hash rate as a human-readable string
pub fn format_hash_rate(hashes_per_sec: f64) -> String {
    const UNITS: &[&str] = &["H/s", "KH/s", "MH/s", "GH/s", "TH/s", "PH/s"];
    let mut rate = hashes_per_sec;
    let mut unit_index = 0;

    while rate >= 1000.0 && unit_index < UNITS.len() - 1 {
        rate /= 1000.0;
        unit_index += 1;
    }

    format!("{:.2} {}", rate, UNITS[unit_index])
}

/// Exponential backoff between retries, doubling up to a ceiling
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            current_attempt: 0,
        }
    }

    /// Delay before the next retry
    pub fn next_delay(&mut self) -> Duration {
        let delay = if self.current_attempt == 0 {
            self.initial
        } else {
            let factor = self.multiplier.powi(self.current_attempt as i32);
            self.initial.mul_f64(factor).min(self.max)
        };

        self.current_attempt = self.current_attempt.saturating_add(1);
        delay.min(self.max)
    }

    /// Start over after a success
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hash_rate() {
        assert_eq!(format_hash_rate(100.0), "100.00 H/s");
        assert_eq!(format_hash_rate(1500.0), "1.50 KH/s");
        assert_eq!(format_hash_rate(1000000.0), "1.00 MH/s");
    }

    #[test]
    fn test_exponential_backoff() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);

        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(backoff.attempt(), 6);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_never_exceeds_max() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(3), 2.0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }
}
