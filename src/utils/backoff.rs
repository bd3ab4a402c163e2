// dbdump/src/utils/backoff.rs
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with proportional jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed, 0.0 to disable.
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl Backoff {
    /// No waiting between attempts.
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter_range = capped * self.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_capped() {
        let backoff = Backoff {
            jitter: 0.0,
            ..Backoff::default()
        };

        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(30));
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = Backoff::default();
        for _ in 0..50 {
            let ms = backoff.delay_for_attempt(2).as_millis();
            assert!((3199..=4801).contains(&ms), "delay {} out of range", ms);
        }
    }

    #[test]
    fn test_none_never_waits() {
        assert_eq!(Backoff::none().delay_for_attempt(7), Duration::ZERO);
    }
}
