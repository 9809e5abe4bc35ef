use chrono::Duration;
use rand::Rng;

use crate::types::Channel;

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub batch_size: i64,
    pub poll_interval_secs: u64,
    /// A row stuck in `sending` longer than this is assumed to belong to
    /// a crashed worker and is returned to `pending` at claim time.
    pub claim_timeout_secs: i64,
    /// How long a terminal row still blocks re-enqueue of its dedupe key.
    pub dedupe_retention_hours: i64,
}

impl DeliveryConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("NOTIFIER_MAX_ATTEMPTS")
            && let Ok(parsed) = value.parse::<u32>()
        {
            config.max_attempts = parsed.max(1);
        }
        if let Ok(value) = std::env::var("NOTIFIER_BATCH_SIZE")
            && let Ok(parsed) = value.parse::<i64>()
        {
            config.batch_size = parsed.max(1);
        }
        if let Ok(value) = std::env::var("NOTIFIER_POLL_INTERVAL_SECS")
            && let Ok(parsed) = value.parse::<u64>()
        {
            config.poll_interval_secs = parsed.max(1);
        }
        if let Ok(value) = std::env::var("NOTIFIER_CLAIM_TIMEOUT_SECS")
            && let Ok(parsed) = value.parse::<i64>()
        {
            config.claim_timeout_secs = parsed.max(1);
        }
        if let Ok(value) = std::env::var("NOTIFIER_DEDUPE_RETENTION_HOURS")
            && let Ok(parsed) = value.parse::<i64>()
        {
            config.dedupe_retention_hours = parsed.max(1);
        }

        config
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            batch_size: 10,
            poll_interval_secs: 15,
            claim_timeout_secs: 300,
            dedupe_retention_hours: 72,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReminderConfig {
    /// Half-width of the matching window around each reminder target,
    /// sized to the polling interval so windows neither gap nor overlap.
    pub window_minutes: i64,
    pub poll_interval_secs: u64,
}

impl ReminderConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("NOTIFIER_REMINDER_WINDOW_MINUTES")
            && let Ok(parsed) = value.parse::<i64>()
        {
            config.window_minutes = parsed.max(1);
        }
        if let Ok(value) = std::env::var("NOTIFIER_REMINDER_POLL_INTERVAL_SECS")
            && let Ok(parsed) = value.parse::<u64>()
        {
            config.poll_interval_secs = parsed.max(1);
        }

        config
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            window_minutes: 30,
            poll_interval_secs: 300,
        }
    }
}

/// Retry delay before attempt `attempt_no + 1`, given that `attempt_no`
/// attempts have already failed. Exponential with jitter: doubling for
/// the first three attempts, 1.5x after, capped per channel. SMS retries
/// faster than email.
pub fn backoff_delay(channel: Channel, attempt_no: i64) -> Duration {
    let attempt_no = attempt_no.max(1);
    let (base_secs, max_secs) = match channel {
        Channel::Email => (60.0_f64, 30.0 * 60.0),
        Channel::Sms => (30.0_f64, 15.0 * 60.0),
    };

    let delay_secs = if attempt_no <= 3 {
        base_secs * 2.0_f64.powi((attempt_no - 1) as i32)
    } else {
        base_secs * 8.0 * 1.5_f64.powi((attempt_no - 4) as i32)
    };
    let delay_secs = delay_secs.min(max_secs);

    // 5-15% jitter so simultaneous failures do not retry in lockstep.
    let jitter = delay_secs * rand::thread_rng().gen_range(0.05..0.15);
    Duration::milliseconds(((delay_secs + jitter) * 1000.0).round() as i64)
}
