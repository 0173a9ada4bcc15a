//! # Reconnect Backoff
//!
//! Capped exponential delay policy for reconnection.
//!
//! The delay starts at the floor. Every failure hands out the current delay
//! and doubles it for the next one, up to the ceiling. A successful
//! connection resets it to the floor.

use std::time::Duration;

/// Pure reconnect delay policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectBackoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
    consecutive_failures: u32,
}

impl ReconnectBackoff {
    /// Create a policy. A ceiling below the floor is raised to the floor.
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
            consecutive_failures: 0,
        }
    }

    /// Delay to wait before the next retry. Advances the policy.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        delay
    }

    /// Restore the delay to the floor.
    pub fn reset(&mut self) {
        self.current = self.floor;
        self.consecutive_failures = 0;
    }

    /// Delay the next retry would use.
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Failures since the last reset.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Configured floor.
    pub fn floor(&self) -> Duration {
        self.floor
    }

    /// Configured ceiling.
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}

/// Pending delay after `failures` consecutive failures:
/// `min(floor * 2^failures, ceiling)`.
pub fn delay_after_failures(floor: Duration, ceiling: Duration, failures: u32) -> Duration {
    let ceiling = ceiling.max(floor);
    let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
    floor.saturating_mul(factor).min(ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FLOOR: Duration = Duration::from_secs(1);
    const CEILING: Duration = Duration::from_secs(900);

    #[test]
    fn test_first_delay_is_floor() {
        let mut backoff = ReconnectBackoff::new(FLOOR, CEILING);
        assert_eq!(backoff.next_delay(), FLOOR);
        assert_eq!(backoff.current_delay(), FLOOR * 2);
    }

    #[test]
    fn test_doubles_then_caps() {
        let mut backoff = ReconnectBackoff::new(FLOOR, CEILING);
        let delays: Vec<u64> = (0..12).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(
            delays,
            vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 900, 900]
        );
    }

    #[test]
    fn test_reset_restores_floor() {
        let mut backoff = ReconnectBackoff::new(FLOOR, CEILING);
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.next_delay(), FLOOR);
    }

    #[test]
    fn test_ceiling_below_floor() {
        let backoff = ReconnectBackoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.ceiling(), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_after_huge_failure_count() {
        assert_eq!(delay_after_failures(FLOOR, CEILING, 200), CEILING);
    }

    proptest! {
        #[test]
        fn prop_current_delay_matches_closed_form(failures in 0u32..64) {
            let mut backoff = ReconnectBackoff::new(FLOOR, CEILING);
            for _ in 0..failures {
                backoff.next_delay();
            }
            prop_assert_eq!(
                backoff.current_delay(),
                delay_after_failures(FLOOR, CEILING, failures)
            );
        }

        #[test]
        fn prop_delay_never_exceeds_ceiling(floor_ms in 1u64..10_000, failures in 0u32..100) {
            let floor = Duration::from_millis(floor_ms);
            let delay = delay_after_failures(floor, CEILING, failures);
            prop_assert!(delay <= CEILING.max(floor));
            prop_assert!(delay >= floor.min(CEILING.max(floor)));
        }
    }
}
