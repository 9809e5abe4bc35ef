use serde::{Deserialize, Serialize};

/// Raw JSON shape of `POST /webhook/appointment`. Parsed only after the
/// signature over the raw body has been checked; field-level validation
/// happens in the handler.
#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentEventPayload {
    pub appointment_id: String,
    pub patient_name: String,
    pub patient_email: Option<String>,
    pub patient_phone: Option<String>,
    pub service_type: String,
    pub appointment_date: String,
    pub appointment_time: String,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub success: bool,
    /// Number of outbox rows this event produced (0 if every dedupe key
    /// already existed).
    pub enqueued: usize,
}

/// Contact-form submission body for `POST /api/contact`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactAck {
    pub success: bool,
    pub message_id: uuid::Uuid,
}
