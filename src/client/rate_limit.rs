//! Request spacing, quota bookkeeping and retry delays

use crate::config::ProviderConfig;
use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces requests to respect the provider's rate limit
pub struct RateLimiter {
    min_interval: Duration,
    state: Mutex<LimiterState>,
}

#[derive(Default)]
struct LimiterState {
    last_request: Option<Instant>,
    remaining_quota: Option<u64>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Wait until the next request is allowed, then claim the slot
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        if let Some(last) = state.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        state.last_request = Some(Instant::now());
    }

    pub async fn record_quota(&self, remaining: u64) {
        self.state.lock().await.remaining_quota = Some(remaining);
    }

    /// Remaining requests as last reported by the provider
    pub async fn remaining_quota(&self) -> Option<u64> {
        self.state.lock().await.remaining_quota
    }
}

/// Exponential backoff: `base * 2^attempt`, capped, with random jitter
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    /// Up to this fraction of the delay is added at random
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_attempts: 4,
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            max_attempts: config.max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::rng().random_range(0.0..=self.jitter);
        delay.mul_f64(1.0 + extra).min(self.max)
    }
}
