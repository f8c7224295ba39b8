//! Retry policy with exponential backoff and `Retry-After` cooperation

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::RetryConfig;

/// Statuses retried by the executor
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Retry policy for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each later one
    pub base_delay: Duration,
    /// Upper bound for a computed delay; server hints are not capped
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts this policy allows
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `attempt` (0-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        backoff_delay(self.base_delay, self.max_delay, attempt, retry_after)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

/// `base * 2^attempt` capped at `max`, replaced by the server hint when one is given
#[must_use]
pub fn backoff_delay(
    base: Duration,
    max: Duration,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    retry_after.unwrap_or_else(|| {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        base.checked_mul(factor).unwrap_or(Duration::MAX).min(max)
    })
}

/// Whether a status belongs to the retryable set
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date
#[must_use]
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    if let Ok(secs) = value.parse::<f64>() {
        // Negative, NaN and out-of-range values are no hint
        return Duration::try_from_secs_f64(secs).ok();
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    // A date in the past means "retry now"
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }

    #[test]
    fn delays_double_per_attempt() {
        let p = policy();
        assert_eq!(p.delay_for(0, None), Duration::from_millis(100));
        assert_eq!(p.delay_for(1, None), Duration::from_millis(200));
        assert_eq!(p.delay_for(2, None), Duration::from_millis(400));
        assert_eq!(p.delay_for(3, None), Duration::from_millis(800));
    }

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let p = policy();
        let delays: Vec<Duration> = (0..40).map(|a| p.delay_for(a, None)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn retry_after_overrides_computed_delay() {
        let p = policy();
        assert_eq!(p.delay_for(0, Some(Duration::from_secs(2))), Duration::from_secs(2));
        // Shorter hints win too
        assert_eq!(p.delay_for(3, Some(Duration::from_millis(10))), Duration::from_millis(10));
        // Longer than max_delay is still honored
        assert_eq!(p.delay_for(0, Some(Duration::from_secs(60))), Duration::from_secs(60));
    }

    #[test]
    fn retryable_status_set() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{status}");
        }
        for status in [200, 400, 401, 403, 404, 409, 501] {
            assert!(!is_retryable_status(status), "{status}");
        }
    }

    #[test]
    fn parse_retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("7", now), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 0 ", now), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("1.5", now), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("", now), None);
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn parse_retry_after_rejects_unrepresentable_floats() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("1e30", now), None);
        assert_eq!(parse_retry_after("-1.5", now), None);
        assert_eq!(parse_retry_after("NaN", now), None);
        assert_eq!(parse_retry_after("inf", now), None);
    }

    #[test]
    fn parse_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn none_policy_allows_single_attempt() {
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
        assert_eq!(policy().max_attempts(), 4);
    }
}
