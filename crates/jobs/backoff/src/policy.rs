//! Retry delay policy.

use std::time::Duration;

/// Delay before resubmission `n` is `DELAY_TABLE[n - 1]`:
/// 5 minutes, 15 minutes, 45 minutes, 2 hours, 6 hours.
pub const DELAY_TABLE: [Duration; 5] = [
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(45 * 60),
    Duration::from_secs(2 * 60 * 60),
    Duration::from_secs(6 * 60 * 60),
];

/// Delay before resubmission number `attempt`.
///
/// Attempts past the table return its last entry; attempt 0 is treated as
/// the first. Pure: no clock, no shared state.
pub fn delay_for(attempt: u32) -> Duration {
    let index = (attempt.max(1) as usize - 1).min(DELAY_TABLE.len() - 1);
    DELAY_TABLE[index]
}

/// Trait for retry strategies.
pub trait RetryStrategy: Send + Sync {
    /// Returns the delay before the next attempt, or None if max retries exceeded.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Returns the maximum number of attempts.
    fn max_attempts(&self) -> u32;

    /// Checks if another retry should be attempted.
    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }
}

/// Table-driven strategy: `delay_for` up to a retry ceiling.
#[derive(Debug, Clone)]
pub struct EscalatingBackoff {
    /// Maximum number of resubmissions.
    pub max_attempts: u32,
}

impl EscalatingBackoff {
    /// Creates the default strategy (5 resubmissions).
    pub fn new() -> Self {
        Self { max_attempts: 5 }
    }

    /// Sets the maximum attempts.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }
}

impl Default for EscalatingBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryStrategy for EscalatingBackoff {
    /// `attempt` is the number of attempts already made.
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(delay_for(attempt + 1))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_table_values() {
        let delays: Vec<u128> = (1..=5).map(|n| delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![300_000, 900_000, 2_700_000, 7_200_000, 21_600_000]);
    }

    #[test]
    fn test_delay_caps_at_last_entry() {
        assert_eq!(delay_for(6).as_millis(), 21_600_000);
        assert_eq!(delay_for(50).as_millis(), 21_600_000);
        assert_eq!(delay_for(u32::MAX).as_millis(), 21_600_000);
    }

    #[test]
    fn test_delay_strictly_increasing() {
        for n in 1..5 {
            assert!(delay_for(n) < delay_for(n + 1));
        }
    }

    #[test]
    fn test_attempt_zero_uses_first_delay() {
        assert_eq!(delay_for(0), delay_for(1));
    }

    #[test]
    fn test_escalating_backoff() {
        let strategy = EscalatingBackoff::new();

        assert_eq!(strategy.next_delay(0), Some(Duration::from_secs(300)));
        assert_eq!(strategy.next_delay(4), Some(Duration::from_secs(21_600)));
        assert_eq!(strategy.next_delay(5), None);
        assert!(strategy.should_retry(4));
        assert!(!strategy.should_retry(5));
    }

    #[test]
    fn test_escalating_backoff_custom_ceiling() {
        let strategy = EscalatingBackoff::new().max_attempts(2);

        assert_eq!(strategy.next_delay(1), Some(Duration::from_secs(900)));
        assert_eq!(strategy.next_delay(2), None);
    }
}
