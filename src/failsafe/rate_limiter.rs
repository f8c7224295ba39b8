//! Client-side request pacing

use std::num::NonZeroU32;

use governor::{Quota, RateLimiter as GovernorLimiter};
use parking_lot::Mutex;

use crate::config::RateLimitConfig;

type DirectLimiter = GovernorLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Paces outbound requests so bursts stay under the provider's quota
pub struct RateLimiter {
    enabled: bool,
    inner: Mutex<Option<std::sync::Arc<DirectLimiter>>>,
    rps: u32,
    burst: u32,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            inner: Mutex::new(None),
            rps: config.requests_per_second,
            burst: config.burst_size,
        }
    }

    /// Limiter that never waits
    pub fn disabled() -> Self {
        Self::new(&RateLimitConfig::default())
    }

    /// Whether pacing is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn limiter(&self) -> std::sync::Arc<DirectLimiter> {
        let mut inner = self.inner.lock();
        inner
            .get_or_insert_with(|| {
                let quota = Quota::per_second(NonZeroU32::new(self.rps).unwrap_or(NonZeroU32::MIN))
                    .allow_burst(NonZeroU32::new(self.burst).unwrap_or(NonZeroU32::MIN));
                std::sync::Arc::new(GovernorLimiter::direct(quota))
            })
            .clone()
    }

    /// Try to acquire a permit without waiting
    pub fn try_acquire(&self) -> bool {
        if !self.enabled {
            return true;
        }
        self.limiter().check().is_ok()
    }

    /// Wait until a permit is available
    pub async fn acquire(&self) {
        if !self.enabled {
            return;
        }
        // Lock is released before awaiting
        let limiter = self.limiter();
        limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_limiter_always_admits() {
        let limiter = RateLimiter::disabled();
        assert!(!limiter.is_enabled());
        for _ in 0..1_000 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn burst_is_enforced() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: 1,
            burst_size: 2,
        });
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn acquire_returns_when_disabled() {
        RateLimiter::disabled().acquire().await;
    }
}
