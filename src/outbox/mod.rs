pub mod admin;
mod config;
pub mod store;

pub use config::{DeliveryConfig, ReminderConfig, backoff_delay};
pub use store::{AttemptTiming, EnqueueResult, StoreError, format_utc};
