use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use gateway_common::RateLimitDefaults;

use crate::error::GateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    const ALL: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];

    fn size_secs(self) -> i64 {
        match self {
            Window::Minute => 60,
            Window::Hour => 3_600,
            Window::Day => 86_400,
        }
    }

    fn limit(self, defaults: &RateLimitDefaults) -> u32 {
        match self {
            Window::Minute => defaults.per_minute,
            Window::Hour => defaults.per_hour,
            Window::Day => defaults.per_day,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    window_start: i64,
    count: u32,
}

/// Fixed-size (not sliding) window counters plus a per-api-key concurrency
/// semaphore. Windows accept boundary bursts by design (§5's documented
/// simplicity trade-off); concurrency is acquire-on-admit /
/// release-on-complete via the returned permit's `Drop`.
pub struct RateLimiter {
    defaults: RateLimitDefaults,
    windows: Mutex<HashMap<(i64, Window), Bucket>>,
    concurrency: Mutex<HashMap<i64, Arc<Semaphore>>>,
    concurrency_limit: usize,
}

impl RateLimiter {
    pub fn new(defaults: RateLimitDefaults, concurrency_limit: usize) -> Self {
        Self {
            defaults,
            windows: Mutex::new(HashMap::new()),
            concurrency: Mutex::new(HashMap::new()),
            concurrency_limit,
        }
    }

    /// Tries each window dimension in order; increments as it goes and
    /// stops at the first dimension that would exceed its limit, leaving
    /// dimensions after it untouched per the documented reject rule.
    pub fn admit_windows(&self, api_key_id: i64, now_unix: i64) -> Result<(), GateError> {
        let mut guard = self.windows.lock().expect("rate limit mutex poisoned");
        for window in Window::ALL {
            let window_start = now_unix - now_unix.rem_euclid(window.size_secs());
            let bucket = guard.entry((api_key_id, window)).or_default();
            if bucket.window_start != window_start {
                bucket.window_start = window_start;
                bucket.count = 0;
            }
            let limit = window.limit(&self.defaults);
            if bucket.count >= limit {
                let retry_after_secs = (window_start + window.size_secs() - now_unix).max(0) as u64;
                return Err(GateError::RateLimited { retry_after_secs });
            }
            bucket.count += 1;
        }
        Ok(())
    }

    pub async fn acquire_concurrency(&self, api_key_id: i64) -> Option<tokio::sync::OwnedSemaphorePermit> {
        let semaphore = {
            let mut guard = self.concurrency.lock().expect("concurrency mutex poisoned");
            guard
                .entry(api_key_id)
                .or_insert_with(|| Arc::new(Semaphore::new(self.concurrency_limit)))
                .clone()
        };
        semaphore.try_acquire_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_minute_limit_then_rejects() {
        let limiter = RateLimiter::new(
            RateLimitDefaults {
                per_minute: 2,
                per_hour: 1_000,
                per_day: 10_000,
            },
            64,
        );
        assert!(limiter.admit_windows(1, 0).is_ok());
        assert!(limiter.admit_windows(1, 1).is_ok());
        let err = limiter.admit_windows(1, 2).unwrap_err();
        assert!(matches!(err, GateError::RateLimited { .. }));
    }

    #[test]
    fn window_resets_on_next_bucket() {
        let limiter = RateLimiter::new(
            RateLimitDefaults {
                per_minute: 1,
                per_hour: 1_000,
                per_day: 10_000,
            },
            64,
        );
        assert!(limiter.admit_windows(1, 0).is_ok());
        assert!(limiter.admit_windows(1, 59).is_err());
        assert!(limiter.admit_windows(1, 60).is_ok());
    }

    #[tokio::test]
    async fn concurrency_slot_is_released_on_drop() {
        let limiter = RateLimiter::new(RateLimitDefaults::default(), 1);
        let permit = limiter.acquire_concurrency(1).await.expect("first acquire");
        assert!(limiter.acquire_concurrency(1).await.is_none());
        drop(permit);
        assert!(limiter.acquire_concurrency(1).await.is_some());
    }
}
