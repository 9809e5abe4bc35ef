pub mod admin;
pub mod api_error;
pub mod appointment;
pub mod outbox_message;
pub mod webhook;

#[allow(unused_imports)]
pub use outbox_message::{
    Channel, DeliveryAttempt, DeliveryErrorKind, MessageStatus, NewOutboxMessage, OutboxMessage,
};
#[allow(unused_imports)]
pub use appointment::{Appointment, AppointmentStatus};
#[allow(unused_imports)]
pub use webhook::{AppointmentEventPayload, ContactAck, ContactSubmission, WebhookAck};
#[allow(unused_imports)]
pub use api_error::{ApiErrorCode, ApiErrorResponse};
#[allow(unused_imports)]
pub use admin::{
    GetMessageResponse, ListAttemptsResponse, ListMessagesResponse, ReplayMessageResponse,
};
