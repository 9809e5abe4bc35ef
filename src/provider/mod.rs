//! Uniform send interface over the third-party email/SMS transports.
//!
//! Adapters construct the provider request, classify transport failures
//! as transient or permanent, and nothing else: all retry policy lives
//! in the delivery worker.

mod email;
mod sms;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Channel, DeliveryErrorKind, OutboxMessage};

pub use email::{EmailProvider, EmailProviderConfig};
pub use sms::{SmsProvider, SmsProviderConfig};

#[derive(Debug, Clone)]
pub struct ProviderReceipt {
    pub provider_message_id: String,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Likely to succeed on retry: timeouts, connection failures,
    /// provider 5xx, provider rate limiting.
    #[error("transient provider failure ({}): {message}", .kind.as_str())]
    Transient {
        kind: DeliveryErrorKind,
        message: String,
    },
    /// Will never succeed unchanged: rejected payload, invalid recipient.
    #[error("permanent provider failure ({}): {message}", .kind.as_str())]
    Permanent {
        kind: DeliveryErrorKind,
        message: String,
    },
}

impl ProviderError {
    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            DeliveryErrorKind::Timeout
        } else {
            DeliveryErrorKind::Network
        };
        ProviderError::Transient {
            kind,
            message: err.to_string(),
        }
    }

    /// Shared classification of a non-2xx provider response.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        let message = format!("provider returned {}: {}", status.as_u16(), truncate(&body));
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProviderError::Transient {
                kind: DeliveryErrorKind::RateLimited,
                message,
            }
        } else if status.is_server_error() {
            ProviderError::Transient {
                kind: DeliveryErrorKind::Unexpected,
                message,
            }
        } else if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            ProviderError::Permanent {
                kind: DeliveryErrorKind::InvalidRecipient,
                message,
            }
        } else {
            ProviderError::Permanent {
                kind: DeliveryErrorKind::Rejected,
                message,
            }
        }
    }
}

fn truncate(body: &str) -> &str {
    let cut = body
        .char_indices()
        .nth(200)
        .map_or(body.len(), |(idx, _)| idx);
    &body[..cut]
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// One delivery attempt. Never retries internally.
    async fn send(&self, message: &OutboxMessage) -> Result<ProviderReceipt, ProviderError>;
}

/// Channel -> adapter lookup. A channel without a configured adapter is
/// simply absent; its messages stay pending until an operator fixes the
/// configuration.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<Channel, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        let mut map = HashMap::new();
        for adapter in adapters {
            map.insert(adapter.channel(), adapter);
        }
        Self { adapters: map }
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.adapters.keys().copied().collect();
        channels.sort_by_key(|channel| channel.as_str());
        channels
    }
}
