use axum::{Json, extract::State};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    extractors::{MessageId, ValidQuery},
    outbox::admin::{
        ListMessagesParams, MessageCursor, list_attempts, list_messages, replay_message,
    },
    outbox::store::get_message,
    state::AppState,
    types::{
        Channel, GetMessageResponse, ListAttemptsResponse, ListMessagesResponse, MessageStatus,
        ReplayMessageResponse,
    },
};

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    limit: Option<i64>,
    before: Option<String>,
    status: Option<String>,
    channel: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    created_at: String,
    id: String,
}

pub async fn list_messages_handler(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<ListMessagesQuery>,
) -> Result<Json<ListMessagesResponse>, ApiError> {
    let limit = parse_limit(query.limit)?;
    let before = match query.before {
        Some(raw) => Some(decode_cursor(&raw)?),
        None => None,
    };
    let status = match query.status {
        Some(raw) => Some(parse_status(&raw)?),
        None => None,
    };
    let channel = match query.channel {
        Some(raw) => Some(parse_channel(&raw)?),
        None => None,
    };

    let params = ListMessagesParams {
        limit,
        before,
        status,
        channel,
    };

    let result = list_messages(&state.pool, &params).await?;
    let next_before = match result.next_before {
        Some(cursor) => Some(encode_cursor(&cursor)?),
        None => None,
    };

    Ok(Json(ListMessagesResponse {
        messages: result.messages,
        next_before,
    }))
}

pub async fn get_message_handler(
    State(state): State<AppState>,
    MessageId(message_id): MessageId,
) -> Result<Json<GetMessageResponse>, ApiError> {
    let message = get_message(&state.pool, message_id).await?;
    Ok(Json(GetMessageResponse { message }))
}

pub async fn list_attempts_handler(
    State(state): State<AppState>,
    MessageId(message_id): MessageId,
) -> Result<Json<ListAttemptsResponse>, ApiError> {
    let attempts = list_attempts(&state.pool, message_id).await?;
    Ok(Json(ListAttemptsResponse { attempts }))
}

pub async fn replay_message_handler(
    State(state): State<AppState>,
    MessageId(message_id): MessageId,
) -> Result<Json<ReplayMessageResponse>, ApiError> {
    let message = replay_message(&state.pool, message_id).await?;
    Ok(Json(ReplayMessageResponse { message }))
}

fn parse_limit(limit: Option<i64>) -> Result<i64, ApiError> {
    let limit = limit.unwrap_or(50);
    if !(1..=200).contains(&limit) {
        return Err(ApiError::validation("limit must be between 1 and 200"));
    }
    Ok(limit)
}

fn parse_status(value: &str) -> Result<MessageStatus, ApiError> {
    match value {
        "pending" => Ok(MessageStatus::Pending),
        "sending" => Ok(MessageStatus::Sending),
        "sent" => Ok(MessageStatus::Sent),
        "failed" => Ok(MessageStatus::Failed),
        "dead" => Ok(MessageStatus::Dead),
        _ => Err(ApiError::validation("status is invalid")),
    }
}

fn parse_channel(value: &str) -> Result<Channel, ApiError> {
    match value {
        "email" => Ok(Channel::Email),
        "sms" => Ok(Channel::Sms),
        _ => Err(ApiError::validation("channel is invalid")),
    }
}

fn decode_cursor(raw: &str) -> Result<MessageCursor, ApiError> {
    let decoded = URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|_| ApiError::validation("before must be a valid cursor"))?;
    let payload: CursorPayload = serde_json::from_slice(&decoded)
        .map_err(|_| ApiError::validation("before must be a valid cursor"))?;
    DateTime::parse_from_rfc3339(&payload.created_at)
        .map_err(|_| ApiError::validation("before must be a valid cursor"))?;
    let id = Uuid::parse_str(&payload.id)
        .map_err(|_| ApiError::validation("before must be a valid cursor"))?;
    Ok(MessageCursor {
        created_at: payload.created_at,
        id,
    })
}

fn encode_cursor(cursor: &MessageCursor) -> Result<String, ApiError> {
    let payload = CursorPayload {
        created_at: cursor.created_at.clone(),
        id: cursor.id.to_string(),
    };
    let encoded = serde_json::to_vec(&payload)
        .map_err(|_| ApiError::Internal("failed to encode cursor".to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(encoded))
}
