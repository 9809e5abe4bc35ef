use std::collections::BTreeMap;

use axum::{Json, extract::State, http::HeaderMap};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::ApiError,
    extractors::ValidJson,
    handlers::webhook::client_key,
    outbox::store,
    phone,
    state::AppState,
    templates,
    types::{Channel, ContactAck, ContactSubmission, NewOutboxMessage},
};

const MAX_MESSAGE_CHARS: usize = 2000;

/// `POST /api/contact`. Public endpoint: rate-limited per client, then
/// validated, then turned into one internal email to the clinic inbox.
///
/// Each submission is a distinct message, so the dedupe key is a fresh
/// UUID; idempotency here would swallow legitimate repeat contacts.
pub async fn contact_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidJson(submission): ValidJson<ContactSubmission>,
) -> Result<Json<ContactAck>, ApiError> {
    let decision = state.contact_limiter.allow(&client_key(&headers));
    if !decision.allowed {
        return Err(ApiError::RateLimited {
            retry_after_seconds: decision.retry_after_seconds,
        });
    }

    let submission = validate_submission(&state, submission)?;

    let rendered = templates::contact_email(
        &submission.name,
        &submission.email,
        submission.phone.as_deref(),
        &submission.message,
    );

    let result = store::enqueue(
        &state.pool,
        &state.config.delivery,
        &NewOutboxMessage {
            channel: Channel::Email,
            recipient: state.config.contact_recipient.clone(),
            subject: Some(rendered.subject),
            body: rendered.html,
            dedupe_key: format!("contact_{}", Uuid::new_v4()),
        },
    )
    .await?;

    info!(message_id = %result.message.id, "contact submission enqueued");

    Ok(Json(ContactAck {
        success: true,
        message_id: result.message.id,
    }))
}

fn validate_submission(
    state: &AppState,
    submission: ContactSubmission,
) -> Result<ContactSubmission, ApiError> {
    let mut problems = BTreeMap::new();

    let name = submission.name.trim().to_string();
    if name.is_empty() {
        problems.insert("name".to_string(), "must be non-empty".to_string());
    }

    let email = submission.email.trim().to_string();
    if !email.contains('@') {
        problems.insert("email".to_string(), "must be an email address".to_string());
    }

    let message = submission.message.trim().to_string();
    if message.is_empty() {
        problems.insert("message".to_string(), "must be non-empty".to_string());
    } else if message.chars().count() > MAX_MESSAGE_CHARS {
        problems.insert(
            "message".to_string(),
            format!("must be at most {MAX_MESSAGE_CHARS} characters"),
        );
    }

    let phone = match submission.phone {
        Some(raw) if !raw.trim().is_empty() => match phone::normalize(&state.config.phone, &raw) {
            Ok(normalized) => Some(normalized),
            Err(err) => {
                problems.insert("phone".to_string(), err.to_string());
                None
            }
        },
        _ => None,
    };

    if !problems.is_empty() {
        return Err(ApiError::FieldValidation(problems));
    }

    Ok(ContactSubmission {
        name,
        email,
        phone,
        message,
    })
}
