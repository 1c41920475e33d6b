//! Retry backoff policy shared by both pipeline halves
//!
//! The delay grows linearly with the attempt number
//! (`attempt * backoff_unit`), matching the deployed behavior of both
//! retry loops. Attempt 0 is the initial try and sleeps nothing.

use std::time::Duration;

/// Delay to sleep before the given retry attempt
pub(crate) fn backoff_for(attempt: u32, unit: Duration) -> Duration {
    unit * attempt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_linear() {
        let unit = Duration::from_millis(100);
        assert_eq!(backoff_for(0, unit), Duration::ZERO);
        assert_eq!(backoff_for(1, unit), Duration::from_millis(100));
        assert_eq!(backoff_for(2, unit), Duration::from_millis(200));
        assert_eq!(backoff_for(3, unit), Duration::from_millis(300));
    }
}
