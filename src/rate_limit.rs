//! Fixed-window request throttling.
//!
//! Single-process by design: the protected actions are webhook ingestion
//! and form submission, where a reset-on-restart window is an acceptable
//! false negative. Keys are typically the client IP.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimiterConfig {
    /// Webhook ingress default: 30 requests per minute per key.
    pub fn webhook() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 30,
        }
    }

    /// End-user submission default: 10 requests per 15 minutes per key.
    pub fn contact() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            max_requests: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the current window rolls over; zero when allowed.
    pub retry_after_seconds: u64,
}

#[derive(Debug)]
struct Window {
    count: u32,
    started_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> RateDecision {
        self.allow_at(key, Instant::now())
    }

    fn allow_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            // A poisoned lock only means another caller panicked between
            // counter updates; the counters themselves stay usable.
            Err(poisoned) => poisoned.into_inner(),
        };

        // Expired windows are dead weight; dropping them here bounds the
        // map to the keys seen within one window size.
        windows.retain(|_, window| now.duration_since(window.started_at) < self.config.window);

        let window = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started_at: now,
        });

        if window.count < self.config.max_requests {
            window.count += 1;
            return RateDecision {
                allowed: true,
                retry_after_seconds: 0,
            };
        }

        let elapsed = now.duration_since(window.started_at);
        let remaining = self.config.window.saturating_sub(elapsed);
        // Ceiling, so clients never retry inside the same window.
        let retry_after_seconds = remaining.as_millis().div_ceil(1000) as u64;
        RateDecision {
            allowed: false,
            retry_after_seconds: retry_after_seconds.max(1),
        }
    }
}
