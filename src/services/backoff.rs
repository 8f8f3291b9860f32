use std::time::Duration;

/// Linear backoff: the n-th retry waits `base * n`. Attempt 0 means "first
/// try" and never waits.
pub fn linear_backoff(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_linearly_with_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(linear_backoff(0, base), Duration::ZERO);
        assert_eq!(linear_backoff(1, base), Duration::from_secs(1));
        assert_eq!(linear_backoff(2, base), Duration::from_secs(2));
        assert_eq!(
            linear_backoff(3, Duration::from_millis(250)),
            Duration::from_millis(750)
        );
    }
}
