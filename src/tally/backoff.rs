//! Reconnect delay with exponential growth

use std::time::Duration;

/// Exponential reconnect backoff
///
/// The k-th consecutive failure waits `min(floor * 2^(k-1), ceiling)`.
/// [`Backoff::reset`] returns to the floor after a successful frame.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay before the next attempt; doubles the following one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_with_ceiling() {
        let floor = Duration::from_secs(1);
        let ceiling = Duration::from_secs(20);
        let mut backoff = Backoff::new(floor, ceiling);

        for k in 1..=8u32 {
            let expected = (floor * 2u32.pow(k - 1)).min(ceiling);
            assert_eq!(backoff.next_delay(), expected, "failure {}", k);
        }
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(20));
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_ceiling_below_floor() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }
}
