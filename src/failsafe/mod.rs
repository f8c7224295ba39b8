//! Failsafe mechanisms: retry with backoff, rate limiting

mod rate_limiter;
mod retry;

pub use rate_limiter::RateLimiter;
pub use retry::{
    RETRYABLE_STATUSES, RetryPolicy, backoff_delay, is_retryable_status, parse_retry_after,
};
