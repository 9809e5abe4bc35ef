use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::rate_limit::{RateLimiter, RateLimiterConfig};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub webhook_limiter: Arc<RateLimiter>,
    pub contact_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: AppConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            webhook_limiter: Arc::new(RateLimiter::new(RateLimiterConfig::webhook())),
            contact_limiter: Arc::new(RateLimiter::new(RateLimiterConfig::contact())),
        }
    }
}
