use std::collections::BTreeMap;

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use chrono::{NaiveDate, NaiveTime};
use tracing::{info, warn};

use crate::{
    error::ApiError,
    outbox::store,
    phone,
    signature::{self, SIGNATURE_HEADER},
    state::AppState,
    templates::{self, AppointmentSummary},
    types::{
        AppointmentEventPayload, AppointmentStatus, Channel, NewOutboxMessage, WebhookAck,
    },
};

/// `POST /webhook/appointment`.
///
/// Takes the raw body so the signature check covers the exact bytes the
/// sender signed. Stage order is fixed: signature, rate limit, schema
/// validation, enqueue. A request must not consume rate-limit budget
/// before proving it comes from the upstream system.
pub async fn appointment_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let secret = state.config.webhook_secret.as_deref();
    if secret.is_none() {
        warn!("webhook signature verification is disabled; accepting unsigned request");
    }
    let signature_header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !signature::verify(&body, signature_header, secret) {
        return Err(ApiError::unauthorized("invalid webhook signature"));
    }

    let decision = state.webhook_limiter.allow(&client_key(&headers));
    if !decision.allowed {
        return Err(ApiError::RateLimited {
            retry_after_seconds: decision.retry_after_seconds,
        });
    }

    let payload: AppointmentEventPayload = serde_json::from_slice(&body)
        .map_err(|err| ApiError::validation(format!("invalid JSON body: {err}")))?;
    let event = validate_payload(&state, payload)?;

    upsert_appointment(&state, &event).await?;
    let enqueued = enqueue_for_status(&state, &event).await?;

    info!(
        appointment_id = %event.appointment_id,
        status = event.status.as_str(),
        enqueued,
        "appointment webhook processed"
    );

    Ok(Json(WebhookAck {
        success: true,
        enqueued,
    }))
}

/// Payload after field validation: status parsed, phone normalized.
struct ValidatedEvent {
    appointment_id: String,
    patient_name: String,
    patient_email: Option<String>,
    patient_phone: Option<String>,
    service_type: String,
    appointment_date: String,
    appointment_time: String,
    status: AppointmentStatus,
    notes: Option<String>,
}

fn validate_payload(
    state: &AppState,
    payload: AppointmentEventPayload,
) -> Result<ValidatedEvent, ApiError> {
    let mut problems = BTreeMap::new();

    if payload.appointment_id.trim().is_empty() {
        problems.insert("appointment_id".to_string(), "must be non-empty".to_string());
    }
    if payload.patient_name.trim().is_empty() {
        problems.insert("patient_name".to_string(), "must be non-empty".to_string());
    }
    if payload.service_type.trim().is_empty() {
        problems.insert("service_type".to_string(), "must be non-empty".to_string());
    }
    if NaiveDate::parse_from_str(&payload.appointment_date, "%Y-%m-%d").is_err() {
        problems.insert(
            "appointment_date".to_string(),
            "must be a YYYY-MM-DD date".to_string(),
        );
    }
    if NaiveTime::parse_from_str(&payload.appointment_time, "%H:%M").is_err() {
        problems.insert(
            "appointment_time".to_string(),
            "must be a HH:MM time".to_string(),
        );
    }

    let status = AppointmentStatus::parse(&payload.status);
    if status.is_none() {
        problems.insert(
            "status".to_string(),
            "must be one of scheduled, confirmed, cancelled, completed, no-show".to_string(),
        );
    }

    let patient_email = match payload.patient_email {
        Some(email) if !email.trim().is_empty() => {
            let email = email.trim().to_string();
            if email.contains('@') {
                Some(email)
            } else {
                problems.insert(
                    "patient_email".to_string(),
                    "must be an email address".to_string(),
                );
                None
            }
        }
        _ => None,
    };

    let patient_phone = match payload.patient_phone {
        Some(raw) if !raw.trim().is_empty() => match phone::normalize(&state.config.phone, &raw) {
            Ok(normalized) => Some(normalized),
            Err(err) => {
                problems.insert("patient_phone".to_string(), err.to_string());
                None
            }
        },
        _ => None,
    };

    if !problems.is_empty() {
        return Err(ApiError::FieldValidation(problems));
    }

    // Unreachable fallback: a missing status was recorded above.
    let status = status.unwrap_or(AppointmentStatus::Scheduled);

    Ok(ValidatedEvent {
        appointment_id: payload.appointment_id.trim().to_string(),
        patient_name: payload.patient_name.trim().to_string(),
        patient_email,
        patient_phone,
        service_type: payload.service_type.trim().to_string(),
        appointment_date: payload.appointment_date,
        appointment_time: payload.appointment_time,
        status,
        notes: payload.notes,
    })
}

/// Mirrors the appointment locally so the reminder scheduler can run
/// without calling back into the upstream system.
async fn upsert_appointment(state: &AppState, event: &ValidatedEvent) -> Result<(), ApiError> {
    let now_str = store::format_utc(chrono::Utc::now());

    sqlx::query(
        r#"
        INSERT INTO appointments (
            id,
            patient_name,
            patient_email,
            patient_phone,
            service_type,
            appointment_date,
            appointment_time,
            status,
            notes,
            updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            patient_name = excluded.patient_name,
            patient_email = excluded.patient_email,
            patient_phone = excluded.patient_phone,
            service_type = excluded.service_type,
            appointment_date = excluded.appointment_date,
            appointment_time = excluded.appointment_time,
            status = excluded.status,
            notes = excluded.notes,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&event.appointment_id)
    .bind(&event.patient_name)
    .bind(event.patient_email.as_deref())
    .bind(event.patient_phone.as_deref())
    .bind(&event.service_type)
    .bind(&event.appointment_date)
    .bind(&event.appointment_time)
    .bind(event.status.as_str())
    .bind(event.notes.as_deref())
    .bind(&now_str)
    .execute(&state.pool)
    .await?;

    Ok(())
}

async fn enqueue_for_status(state: &AppState, event: &ValidatedEvent) -> Result<usize, ApiError> {
    let summary = AppointmentSummary {
        patient_name: &event.patient_name,
        service_type: &event.service_type,
        appointment_date: &event.appointment_date,
        appointment_time: &event.appointment_time,
    };

    let (email, sms) = match event.status {
        AppointmentStatus::Scheduled | AppointmentStatus::Confirmed => (
            Some(templates::confirmation_email(&summary)),
            Some(templates::confirmation_sms(&summary)),
        ),
        AppointmentStatus::Cancelled => (
            Some(templates::cancellation_email(&summary)),
            Some(templates::cancellation_sms(&summary)),
        ),
        // Nothing to tell the patient after the fact.
        AppointmentStatus::Completed | AppointmentStatus::NoShow => (None, None),
    };

    let mut enqueued = 0;

    if let (Some(rendered), Some(recipient)) = (email, event.patient_email.as_ref()) {
        let result = store::enqueue(
            &state.pool,
            &state.config.delivery,
            &NewOutboxMessage {
                channel: Channel::Email,
                recipient: recipient.clone(),
                subject: Some(rendered.subject),
                body: rendered.html,
                dedupe_key: event_dedupe_key(event, Channel::Email),
            },
        )
        .await?;
        if result.created {
            enqueued += 1;
        }
    }

    if let (Some(body), Some(recipient)) = (sms, event.patient_phone.as_ref()) {
        let result = store::enqueue(
            &state.pool,
            &state.config.delivery,
            &NewOutboxMessage {
                channel: Channel::Sms,
                recipient: recipient.clone(),
                subject: None,
                body,
                dedupe_key: event_dedupe_key(event, Channel::Sms),
            },
        )
        .await?;
        if result.created {
            enqueued += 1;
        }
    }

    Ok(enqueued)
}

fn event_dedupe_key(event: &ValidatedEvent, channel: Channel) -> String {
    format!(
        "appointment_{}_{}_{}",
        event.appointment_id,
        event.status.as_str(),
        channel.as_str()
    )
}

/// Rate-limit key for the caller.
///
/// The service sits behind a single reverse proxy, which appends the
/// real peer address as the last `X-Forwarded-For` element. Earlier
/// elements are whatever the client sent and must be ignored, or any
/// caller could mint a fresh budget per request by rotating a fake hop.
pub(crate) fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.rsplit(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
