//! Operator query surface over the outbox: audit listing, attempt
//! history, and replay of terminal messages.

use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool};
use uuid::Uuid;

use crate::outbox::store::{
    MessageRow, StoreError, format_utc, parse_error_kind,
};
use crate::types::{Channel, DeliveryAttempt, MessageStatus, OutboxMessage};

#[derive(Debug, Clone)]
pub struct MessageCursor {
    pub created_at: String,
    pub id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ListMessagesParams {
    pub limit: i64,
    pub before: Option<MessageCursor>,
    pub status: Option<MessageStatus>,
    pub channel: Option<Channel>,
}

#[derive(Debug, Clone)]
pub struct ListMessagesResult {
    pub messages: Vec<OutboxMessage>,
    pub next_before: Option<MessageCursor>,
}

pub async fn list_messages(
    pool: &SqlitePool,
    params: &ListMessagesParams,
) -> Result<ListMessagesResult, StoreError> {
    let mut query = QueryBuilder::new("SELECT * FROM message_outbox WHERE 1 = 1");

    if let Some(status) = params.status {
        query.push(" AND status = ");
        query.push_bind(status.as_str());
    }

    if let Some(channel) = params.channel {
        query.push(" AND channel = ");
        query.push_bind(channel.as_str());
    }

    if let Some(cursor) = &params.before {
        query.push(" AND (created_at < ");
        query.push_bind(&cursor.created_at);
        query.push(" OR (created_at = ");
        query.push_bind(&cursor.created_at);
        query.push(" AND id < ");
        query.push_bind(cursor.id.to_string());
        query.push("))");
    }

    query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
    query.push_bind(params.limit + 1);

    let rows: Vec<MessageRow> = query.build_query_as().fetch_all(pool).await?;

    let has_more = rows.len() > params.limit as usize;
    let take_count = if has_more {
        params.limit as usize
    } else {
        rows.len()
    };

    let mut messages = Vec::with_capacity(take_count);
    let mut last_cursor = None;

    for row in rows.into_iter().take(take_count) {
        let message: OutboxMessage = row.try_into()?;
        last_cursor = Some(MessageCursor {
            created_at: message.created_at.clone(),
            id: message.id,
        });
        messages.push(message);
    }

    let next_before = if has_more { last_cursor } else { None };

    Ok(ListMessagesResult {
        messages,
        next_before,
    })
}

pub async fn list_attempts(
    pool: &SqlitePool,
    message_id: Uuid,
) -> Result<Vec<DeliveryAttempt>, StoreError> {
    let exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM message_outbox WHERE id = ?",
    )
    .bind(message_id.to_string())
    .fetch_one(pool)
    .await?;

    if exists == 0 {
        return Err(StoreError::NotFound("message not found".to_string()));
    }

    let rows = sqlx::query_as::<_, AttemptRow>(
        r#"
        SELECT *
        FROM delivery_attempts
        WHERE message_id = ?
        ORDER BY attempt_no ASC
        "#,
    )
    .bind(message_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(AttemptRow::try_into).collect()
}

/// Re-enqueues a terminal (`failed`/`dead`) message as a fresh pending
/// row linked back to the source. Non-terminal messages cannot be
/// replayed: they are still owned by the delivery worker.
pub async fn replay_message(
    pool: &SqlitePool,
    message_id: Uuid,
) -> Result<OutboxMessage, StoreError> {
    let now_str = format_utc(Utc::now());

    let mut tx = pool.begin().await?;

    let source = sqlx::query_as::<_, MessageRow>("SELECT * FROM message_outbox WHERE id = ?")
        .bind(message_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound("message not found".to_string()))?;

    let source: OutboxMessage = source.try_into()?;
    if !matches!(source.status, MessageStatus::Failed | MessageStatus::Dead) {
        return Err(StoreError::Conflict(
            "only failed or dead messages can be replayed".to_string(),
        ));
    }

    let new_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO message_outbox (
            id,
            channel,
            recipient,
            subject,
            body,
            dedupe_key,
            status,
            attempts,
            next_attempt_at,
            last_error,
            replayed_from_message_id,
            created_at,
            updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, NULL, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(new_id.to_string())
    .bind(source.channel.as_str())
    .bind(&source.recipient)
    .bind(source.subject.as_deref())
    .bind(&source.body)
    .bind(&source.dedupe_key)
    .bind(&now_str)
    .bind(message_id.to_string())
    .bind(&now_str)
    .bind(&now_str)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(StoreError::Conflict(
            "an active message with this dedupe key already exists".to_string(),
        ));
    }

    let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM message_outbox WHERE id = ?")
        .bind(new_id.to_string())
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    row.try_into()
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: String,
    message_id: String,
    attempt_no: i64,
    started_at: String,
    finished_at: String,
    provider_message_id: Option<String>,
    error_kind: Option<String>,
    error_message: Option<String>,
}

impl TryFrom<AttemptRow> for DeliveryAttempt {
    type Error = StoreError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        let error_kind = match row.error_kind.as_deref() {
            Some(kind) => Some(parse_error_kind(kind)?),
            None => None,
        };

        Ok(DeliveryAttempt {
            id: Uuid::parse_str(&row.id)
                .map_err(|err| StoreError::Parse(format!("invalid attempt id: {err}")))?,
            message_id: Uuid::parse_str(&row.message_id)
                .map_err(|err| StoreError::Parse(format!("invalid message id: {err}")))?,
            attempt_no: row.attempt_no,
            started_at: row.started_at,
            finished_at: row.finished_at,
            provider_message_id: row.provider_message_id,
            error_kind,
            error_message: row.error_message,
        })
    }
}
