use serde::{Deserialize, Serialize};

use super::{DeliveryAttempt, OutboxMessage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<OutboxMessage>,
    /// Opaque cursor for the next (older) page, absent on the last page.
    pub next_before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMessageResponse {
    pub message: OutboxMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAttemptsResponse {
    pub attempts: Vec<DeliveryAttempt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayMessageResponse {
    pub message: OutboxMessage,
}
