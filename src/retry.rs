//! Retry delay policy.
//!
//! Delays come from a fixed table indexed by the attempt number that just
//! failed; attempts past the end of the table reuse the last entry. An
//! optional jitter is added on top, so a retry never fires earlier than its
//! scheduled slot.

use std::time::Duration;

/// Delay table plus jitter bound.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
    jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(15),
                Duration::from_secs(60),
                Duration::from_secs(300),
            ],
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Replace the delay table. Empty tables are rejected in favor of the
    /// default.
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        if !delays.is_empty() {
            self.delays = delays;
        }
        self
    }

    /// Add up to `jitter` of random extra delay to every retry.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Base delay before retrying after `attempt_number` failed (1-based).
    pub fn delay_for_attempt(&self, attempt_number: u32) -> Duration {
        let index = (attempt_number.saturating_sub(1) as usize).min(self.delays.len() - 1);
        self.delays[index]
    }

    /// Full delay including jitter.
    pub fn retry_delay(&self, attempt_number: u32) -> Duration {
        let mut delay = self.delay_for_attempt(attempt_number);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms > 0 {
            delay += Duration::from_millis(fastrand::u64(0..=jitter_ms));
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_failed_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(15));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(300));
    }

    #[test]
    fn attempts_past_the_table_reuse_the_last_entry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(300));
        assert_eq!(policy.delay_for_attempt(100), Duration::from_secs(300));
    }

    #[test]
    fn delays_are_monotonically_nondecreasing() {
        let policy = RetryPolicy::default();
        for attempt in 1..10 {
            assert!(policy.delay_for_attempt(attempt + 1) >= policy.delay_for_attempt(attempt));
        }
    }

    #[test]
    fn custom_table_and_empty_table_guard() {
        let policy = RetryPolicy::default()
            .with_delays(vec![Duration::from_millis(10), Duration::from_millis(20)]);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(20));

        let kept_default = RetryPolicy::default().with_delays(Vec::new());
        assert_eq!(kept_default.delay_for_attempt(1), Duration::from_secs(1));
    }

    #[test]
    fn jitter_only_adds_delay() {
        let policy = RetryPolicy::default()
            .with_delays(vec![Duration::from_millis(100)])
            .with_jitter(Duration::from_millis(50));
        for _ in 0..32 {
            let d = policy.retry_delay(1);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }
}
