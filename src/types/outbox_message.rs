use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durably stored notification. Rows are only ever mutated through the
/// outbox store operations and are never deleted; terminal rows stay
/// around for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub dedupe_key: String,

    pub status: MessageStatus,
    pub attempts: i64,

    pub next_attempt_at: String,
    pub last_error: Option<String>,
    pub replayed_from_message_id: Option<Uuid>,

    pub created_at: String,
    pub updated_at: String,
}

/// Input to `enqueue`. Id, status and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub dedupe_key: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

/// Forward-only lifecycle: pending -> sending -> {sent | pending | failed | dead}.
/// `failed` is a permanent provider rejection; `dead` means the retry
/// budget was exhausted. Both are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Dead,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::Dead => "dead",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Sent | MessageStatus::Failed | MessageStatus::Dead
        )
    }
}

/// One delivery attempt against a provider, recorded in the same
/// transaction as the status transition it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub message_id: Uuid,
    pub attempt_no: i64,

    pub started_at: String,
    pub finished_at: String,

    pub provider_message_id: Option<String>,
    pub error_kind: Option<DeliveryErrorKind>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorKind {
    Timeout,
    Network,
    RateLimited,
    Rejected,
    InvalidRecipient,
    Unexpected,
}

impl DeliveryErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryErrorKind::Timeout => "timeout",
            DeliveryErrorKind::Network => "network",
            DeliveryErrorKind::RateLimited => "rate_limited",
            DeliveryErrorKind::Rejected => "rejected",
            DeliveryErrorKind::InvalidRecipient => "invalid_recipient",
            DeliveryErrorKind::Unexpected => "unexpected",
        }
    }
}
