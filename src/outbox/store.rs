use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::{QueryBuilder, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::outbox::DeliveryConfig;
use crate::types::{
    Channel, DeliveryErrorKind, MessageStatus, NewOutboxMessage, OutboxMessage,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt row: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct EnqueueResult {
    pub message: OutboxMessage,
    /// False when an existing row with the same dedupe key absorbed the
    /// enqueue (idempotent no-op).
    pub created: bool,
}

/// Wall-clock bounds of one provider call, recorded on the attempt row.
#[derive(Debug, Clone)]
pub struct AttemptTiming {
    pub started_at: String,
    pub finished_at: String,
}

/// Idempotent insert keyed on `dedupe_key`.
///
/// A colliding non-terminal row, or a terminal row still inside the
/// dedupe retention window, makes this a no-op returning the existing
/// row. The partial unique index on active dedupe keys backstops races
/// between concurrent enqueuers.
pub async fn enqueue(
    pool: &SqlitePool,
    config: &DeliveryConfig,
    new: &NewOutboxMessage,
) -> Result<EnqueueResult, StoreError> {
    let now = Utc::now();
    let now_str = format_utc(now);
    let retention_cutoff = format_utc(now - Duration::hours(config.dedupe_retention_hours));

    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT *
        FROM message_outbox
        WHERE dedupe_key = ?
          AND (status IN ('pending', 'sending') OR updated_at >= ?)
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(&new.dedupe_key)
    .bind(&retention_cutoff)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = existing {
        tx.commit().await?;
        return Ok(EnqueueResult {
            message: row.try_into()?,
            created: false,
        });
    }

    let id = Uuid::new_v4();
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
        VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, NULL, NULL, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(id.to_string())
    .bind(new.channel.as_str())
    .bind(&new.recipient)
    .bind(new.subject.as_deref())
    .bind(&new.body)
    .bind(&new.dedupe_key)
    .bind(&now_str)
    .bind(&now_str)
    .bind(&now_str)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        // Lost the race to a concurrent enqueuer; their row wins.
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT *
            FROM message_outbox
            WHERE dedupe_key = ? AND status IN ('pending', 'sending')
            LIMIT 1
            "#,
        )
        .bind(&new.dedupe_key)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::Conflict("dedupe key vanished mid-enqueue".to_string()))?;

        tx.commit().await?;
        return Ok(EnqueueResult {
            message: row.try_into()?,
            created: false,
        });
    }

    let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM message_outbox WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(EnqueueResult {
        message: row.try_into()?,
        created: true,
    })
}

/// Atomically flips up to `limit` due `pending` rows to `sending` and
/// returns them. Safe under concurrent callers: the guarded
/// `UPDATE .. RETURNING` ensures no row is handed to two workers.
///
/// Rows stuck in `sending` past the claim timeout (crashed worker) are
/// swept back to `pending` first. Only the given channels are claimed, so
/// messages for a disabled channel wait instead of burning attempts.
pub async fn claim_batch(
    pool: &SqlitePool,
    config: &DeliveryConfig,
    channels: &[Channel],
    limit: i64,
) -> Result<Vec<OutboxMessage>, StoreError> {
    if channels.is_empty() {
        return Ok(Vec::new());
    }

    let now = Utc::now();
    let now_str = format_utc(now);
    let stuck_cutoff = format_utc(now - Duration::seconds(config.claim_timeout_secs));

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE message_outbox
        SET status = 'pending',
            updated_at = ?
        WHERE status = 'sending'
          AND updated_at <= ?
        "#,
    )
    .bind(&now_str)
    .bind(&stuck_cutoff)
    .execute(&mut *tx)
    .await?;

    let mut claim = QueryBuilder::new(
        "WITH eligible AS ( \
            SELECT id FROM message_outbox \
            WHERE status = 'pending' \
              AND next_attempt_at <= ",
    );
    claim.push_bind(&now_str);
    claim.push(" AND channel IN (");
    let mut channel_list = claim.separated(", ");
    for channel in channels {
        channel_list.push_bind(channel.as_str());
    }
    channel_list.push_unseparated(")");
    claim.push(" ORDER BY created_at ASC LIMIT ");
    claim.push_bind(limit);
    claim.push(
        " ) \
        UPDATE message_outbox \
        SET status = 'sending', updated_at = ",
    );
    claim.push_bind(&now_str);
    claim.push(" WHERE id IN (SELECT id FROM eligible) AND status = 'pending' RETURNING id");

    let claimed_ids: Vec<String> = claim.build_query_scalar().fetch_all(&mut *tx).await?;

    if claimed_ids.is_empty() {
        tx.commit().await?;
        return Ok(Vec::new());
    }

    let mut fetch = QueryBuilder::new("SELECT * FROM message_outbox WHERE id IN (");
    let mut fetch_list = fetch.separated(", ");
    for id in &claimed_ids {
        fetch_list.push_bind(id);
    }
    fetch_list.push_unseparated(") ORDER BY created_at ASC");

    let rows: Vec<MessageRow> = fetch.build_query_as().fetch_all(&mut *tx).await?;

    tx.commit().await?;

    rows.into_iter().map(MessageRow::try_into).collect()
}

/// Records a successful delivery. Guarded by `status = 'sending'`: only
/// the claiming worker can complete the transition.
pub async fn mark_sent(
    pool: &SqlitePool,
    message_id: Uuid,
    provider_message_id: &str,
    timing: &AttemptTiming,
) -> Result<(), StoreError> {
    let now_str = format_utc(Utc::now());

    let mut tx = pool.begin().await?;

    let attempt_no = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE message_outbox
        SET status = 'sent',
            attempts = attempts + 1,
            last_error = NULL,
            updated_at = ?
        WHERE id = ?
          AND status = 'sending'
        RETURNING attempts
        "#,
    )
    .bind(&now_str)
    .bind(message_id.to_string())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| StoreError::Conflict("message is not claimed".to_string()))?;

    insert_attempt(
        &mut tx,
        message_id,
        attempt_no,
        timing,
        Some(provider_message_id),
        None,
        None,
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Records a transient failure and schedules the next attempt.
pub async fn mark_retry(
    pool: &SqlitePool,
    message_id: Uuid,
    error_kind: DeliveryErrorKind,
    error_message: &str,
    next_attempt_at: DateTime<Utc>,
    timing: &AttemptTiming,
) -> Result<(), StoreError> {
    let now_str = format_utc(Utc::now());

    let mut tx = pool.begin().await?;

    let attempt_no = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE message_outbox
        SET status = 'pending',
            attempts = attempts + 1,
            last_error = ?,
            next_attempt_at = ?,
            updated_at = ?
        WHERE id = ?
          AND status = 'sending'
        RETURNING attempts
        "#,
    )
    .bind(error_message)
    .bind(format_utc(next_attempt_at))
    .bind(&now_str)
    .bind(message_id.to_string())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| StoreError::Conflict("message is not claimed".to_string()))?;

    insert_attempt(
        &mut tx,
        message_id,
        attempt_no,
        timing,
        None,
        Some(error_kind),
        Some(error_message),
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Terminal: the retry budget is exhausted. Requires operator replay to
/// ever deliver again.
pub async fn mark_dead(
    pool: &SqlitePool,
    message_id: Uuid,
    error_kind: DeliveryErrorKind,
    error_message: &str,
    max_attempts: u32,
    timing: &AttemptTiming,
) -> Result<(), StoreError> {
    let last_error = format!("max_attempts_exceeded ({max_attempts}): {error_message}");
    mark_terminal_failure(
        pool,
        message_id,
        MessageStatus::Dead,
        error_kind,
        error_message,
        &last_error,
        timing,
    )
    .await
}

/// Terminal: the provider rejected the message permanently; retrying the
/// same payload can never succeed.
pub async fn mark_failed(
    pool: &SqlitePool,
    message_id: Uuid,
    error_kind: DeliveryErrorKind,
    error_message: &str,
    timing: &AttemptTiming,
) -> Result<(), StoreError> {
    mark_terminal_failure(
        pool,
        message_id,
        MessageStatus::Failed,
        error_kind,
        error_message,
        error_message,
        timing,
    )
    .await
}

async fn mark_terminal_failure(
    pool: &SqlitePool,
    message_id: Uuid,
    status: MessageStatus,
    error_kind: DeliveryErrorKind,
    error_message: &str,
    last_error: &str,
    timing: &AttemptTiming,
) -> Result<(), StoreError> {
    let now_str = format_utc(Utc::now());

    let mut tx = pool.begin().await?;

    let attempt_no = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE message_outbox
        SET status = ?,
            attempts = attempts + 1,
            last_error = ?,
            updated_at = ?
        WHERE id = ?
          AND status = 'sending'
        RETURNING attempts
        "#,
    )
    .bind(status.as_str())
    .bind(last_error)
    .bind(&now_str)
    .bind(message_id.to_string())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| StoreError::Conflict("message is not claimed".to_string()))?;

    insert_attempt(
        &mut tx,
        message_id,
        attempt_no,
        timing,
        None,
        Some(error_kind),
        Some(error_message),
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn get_message(
    pool: &SqlitePool,
    message_id: Uuid,
) -> Result<OutboxMessage, StoreError> {
    let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM message_outbox WHERE id = ?")
        .bind(message_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("message not found".to_string()))?;

    row.try_into()
}

async fn insert_attempt(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    message_id: Uuid,
    attempt_no: i64,
    timing: &AttemptTiming,
    provider_message_id: Option<&str>,
    error_kind: Option<DeliveryErrorKind>,
    error_message: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO delivery_attempts (
            id,
            message_id,
            attempt_no,
            started_at,
            finished_at,
            provider_message_id,
            error_kind,
            error_message
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(message_id.to_string())
    .bind(attempt_no)
    .bind(&timing.started_at)
    .bind(&timing.finished_at)
    .bind(provider_message_id)
    .bind(error_kind.map(DeliveryErrorKind::as_str))
    .bind(error_message)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
pub(crate) struct MessageRow {
    id: String,
    channel: String,
    recipient: String,
    subject: Option<String>,
    body: String,
    dedupe_key: String,
    status: String,
    attempts: i64,
    next_attempt_at: String,
    last_error: Option<String>,
    replayed_from_message_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<MessageRow> for OutboxMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let replayed_from_message_id = match row.replayed_from_message_id {
            Some(value) if value.is_empty() => None,
            Some(value) => Some(Uuid::parse_str(&value).map_err(|err| {
                StoreError::Parse(format!("invalid replayed_from_message_id: {err}"))
            })?),
            None => None,
        };

        Ok(OutboxMessage {
            id: Uuid::parse_str(&row.id)
                .map_err(|err| StoreError::Parse(format!("invalid message id: {err}")))?,
            channel: parse_channel(&row.channel)?,
            recipient: row.recipient,
            subject: row.subject,
            body: row.body,
            dedupe_key: row.dedupe_key,
            status: parse_status(&row.status)?,
            attempts: row.attempts,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
            replayed_from_message_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) fn parse_status(status: &str) -> Result<MessageStatus, StoreError> {
    match status {
        "pending" => Ok(MessageStatus::Pending),
        "sending" => Ok(MessageStatus::Sending),
        "sent" => Ok(MessageStatus::Sent),
        "failed" => Ok(MessageStatus::Failed),
        "dead" => Ok(MessageStatus::Dead),
        other => Err(StoreError::Parse(format!("unknown status: {other}"))),
    }
}

pub(crate) fn parse_channel(channel: &str) -> Result<Channel, StoreError> {
    match channel {
        "email" => Ok(Channel::Email),
        "sms" => Ok(Channel::Sms),
        other => Err(StoreError::Parse(format!("unknown channel: {other}"))),
    }
}

pub(crate) fn parse_error_kind(kind: &str) -> Result<DeliveryErrorKind, StoreError> {
    match kind {
        "timeout" => Ok(DeliveryErrorKind::Timeout),
        "network" => Ok(DeliveryErrorKind::Network),
        "rate_limited" => Ok(DeliveryErrorKind::RateLimited),
        "rejected" => Ok(DeliveryErrorKind::Rejected),
        "invalid_recipient" => Ok(DeliveryErrorKind::InvalidRecipient),
        "unexpected" => Ok(DeliveryErrorKind::Unexpected),
        other => Err(StoreError::Parse(format!("unknown error kind: {other}"))),
    }
}

pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}
