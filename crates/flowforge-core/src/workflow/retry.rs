//! Retry backoff computation.
//!
//! Stateless: the executor owns the attempt loop and asks this module how
//! long to wait after a failed attempt.

use std::time::Duration;

use flowforge_types::workflow::RetryPolicy;

/// Whether another attempt is allowed after `attempt` (1-based) failed.
pub fn should_retry(policy: Option<&RetryPolicy>, attempt: u32) -> bool {
    let max = policy.map_or(1, |p| p.max_attempts.max(1));
    attempt < max
}

/// Wait after failed attempt `attempt` (1-based):
/// `delay * multiplier^(attempt - 1)`, capped at `max_delay` when non-zero.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let multiplier = if policy.backoff_multiplier.is_finite() && policy.backoff_multiplier > 0.0 {
        policy.backoff_multiplier
    } else {
        1.0
    };

    let raw = policy.delay as f64 * multiplier.powi(exponent);
    let capped = if policy.max_delay > 0 {
        raw.min(policy.max_delay as f64)
    } else {
        raw
    };

    if capped.is_finite() && capped >= 0.0 {
        Duration::from_millis(capped.min(u64::MAX as f64) as u64)
    } else {
        Duration::from_millis(policy.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, delay: u64, multiplier: f64, max_delay: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay,
            backoff_multiplier: multiplier,
            max_delay,
        }
    }

    #[test]
    fn exponential_growth_is_capped() {
        let p = policy(5, 100, 2.0, 500);
        assert_eq!(backoff_delay(&p, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&p, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&p, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(&p, 4), Duration::from_millis(500));
        assert_eq!(backoff_delay(&p, 40), Duration::from_millis(500));
    }

    #[test]
    fn zero_max_delay_means_uncapped() {
        let p = policy(3, 10, 3.0, 0);
        assert_eq!(backoff_delay(&p, 3), Duration::from_millis(90));
    }

    #[test]
    fn invalid_multiplier_falls_back_to_constant_delay() {
        let p = policy(3, 50, f64::NAN, 0);
        assert_eq!(backoff_delay(&p, 4), Duration::from_millis(50));
        let p = policy(3, 50, -2.0, 0);
        assert_eq!(backoff_delay(&p, 2), Duration::from_millis(50));
    }

    #[test]
    fn retry_budget_counts_total_attempts() {
        let p = policy(3, 0, 1.0, 0);
        assert!(should_retry(Some(&p), 1));
        assert!(should_retry(Some(&p), 2));
        assert!(!should_retry(Some(&p), 3));
        assert!(!should_retry(None, 1));
    }
}
