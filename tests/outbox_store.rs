use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use chrono::{Duration, Utc};
use notifier::{
    outbox::{AttemptTiming, DeliveryConfig, format_utc, store},
    types::{Channel, DeliveryErrorKind, MessageStatus, NewOutboxMessage},
};
use sqlx::{
    Connection, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tempfile::NamedTempFile;
use tokio::sync::Barrier;
use uuid::Uuid;

struct TestDb {
    pool: SqlitePool,
    _db_file: NamedTempFile,
}

async fn setup_db_shared(max_connections: u32) -> TestDb {
    let db_file = NamedTempFile::new().expect("create temp sqlite file");
    let options = SqliteConnectOptions::new()
        .filename(db_file.path())
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_millis(500));

    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .expect("connect sqlite for migrations");
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&mut conn)
        .await
        .expect("enable foreign keys for migrations");
    run_migrations_on_conn(&mut conn)
        .await
        .expect("run migrations");

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON;")
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
        .expect("connect sqlite file");

    TestDb {
        pool,
        _db_file: db_file,
    }
}

async fn run_migrations_on_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    let mut entries: Vec<_> = fs::read_dir("migrations")
        .map_err(sqlx::Error::Io)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("sql"))
        .collect();

    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let contents = fs::read_to_string(entry.path()).map_err(sqlx::Error::Io)?;
        for statement in contents.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&mut *conn).await?;
        }
    }

    Ok(())
}

fn new_message(channel: Channel, dedupe_key: &str) -> NewOutboxMessage {
    NewOutboxMessage {
        channel,
        recipient: match channel {
            Channel::Email => "patient@example.com".to_string(),
            Channel::Sms => "5533998887766".to_string(),
        },
        subject: matches!(channel, Channel::Email).then(|| "Agendamento confirmado".to_string()),
        body: "corpo da mensagem".to_string(),
        dedupe_key: dedupe_key.to_string(),
    }
}

fn timing() -> AttemptTiming {
    let now = format_utc(Utc::now());
    AttemptTiming {
        started_at: now.clone(),
        finished_at: now,
    }
}

async fn status_of(pool: &SqlitePool, id: Uuid) -> String {
    sqlx::query_scalar::<_, String>("SELECT status FROM message_outbox WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(pool)
        .await
        .expect("fetch status")
}

#[tokio::test]
async fn enqueue_creates_pending_message() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let result = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "key-1"))
        .await
        .expect("enqueue");

    assert!(result.created);
    assert_eq!(result.message.status, MessageStatus::Pending);
    assert_eq!(result.message.attempts, 0);
    assert_eq!(result.message.dedupe_key, "key-1");
    assert!(result.message.last_error.is_none());
}

#[tokio::test]
async fn enqueue_same_dedupe_key_is_noop() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let first = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "key-1"))
        .await
        .expect("first enqueue");
    let second = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "key-1"))
        .await
        .expect("second enqueue");

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.message.id, second.message.id);

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM message_outbox")
        .fetch_one(&db.pool)
        .await
        .expect("count rows");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn concurrent_enqueue_same_key_creates_one_row() {
    let db = setup_db_shared(5).await;
    let config = DeliveryConfig::default();
    let barrier = Arc::new(Barrier::new(2));

    let pool_a = db.pool.clone();
    let config_a = config.clone();
    let barrier_a = Arc::clone(&barrier);
    let task_a = tokio::spawn(async move {
        barrier_a.wait().await;
        store::enqueue(&pool_a, &config_a, &new_message(Channel::Email, "shared-key")).await
    });

    let pool_b = db.pool.clone();
    let config_b = config.clone();
    let barrier_b = Arc::clone(&barrier);
    let task_b = tokio::spawn(async move {
        barrier_b.wait().await;
        store::enqueue(&pool_b, &config_b, &new_message(Channel::Email, "shared-key")).await
    });

    let (result_a, result_b) = tokio::join!(task_a, task_b);
    let result_a = result_a.expect("join a").expect("enqueue a");
    let result_b = result_b.expect("join b").expect("enqueue b");

    assert_eq!(result_a.message.id, result_b.message.id);
    assert!(
        result_a.created ^ result_b.created,
        "exactly one enqueue must create the row"
    );

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM message_outbox")
        .fetch_one(&db.pool)
        .await
        .expect("count rows");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn claim_returns_due_messages_and_flips_to_sending() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let due = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "due"))
        .await
        .expect("enqueue due");

    let claimed = store::claim_batch(&db.pool, &config, &[Channel::Email, Channel::Sms], 10)
        .await
        .expect("claim");

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, due.message.id);
    assert_eq!(status_of(&db.pool, due.message.id).await, "sending");
}

#[tokio::test]
async fn claim_skips_future_and_terminal_messages() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let future = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "future"))
        .await
        .expect("enqueue future");
    sqlx::query("UPDATE message_outbox SET next_attempt_at = ? WHERE id = ?")
        .bind(format_utc(Utc::now() + Duration::hours(1)))
        .bind(future.message.id.to_string())
        .execute(&db.pool)
        .await
        .expect("push next_attempt_at forward");

    let dead = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "dead"))
        .await
        .expect("enqueue dead");
    sqlx::query("UPDATE message_outbox SET status = 'dead' WHERE id = ?")
        .bind(dead.message.id.to_string())
        .execute(&db.pool)
        .await
        .expect("force dead");

    let claimed = store::claim_batch(&db.pool, &config, &[Channel::Email], 10)
        .await
        .expect("claim");
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn claim_filters_by_channel() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    store::enqueue(&db.pool, &config, &new_message(Channel::Email, "email-key"))
        .await
        .expect("enqueue email");
    let sms = store::enqueue(&db.pool, &config, &new_message(Channel::Sms, "sms-key"))
        .await
        .expect("enqueue sms");

    let claimed = store::claim_batch(&db.pool, &config, &[Channel::Sms], 10)
        .await
        .expect("claim");

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, sms.message.id);

    let none = store::claim_batch(&db.pool, &config, &[], 10)
        .await
        .expect("claim with no channels");
    assert!(none.is_empty());
}

#[tokio::test]
async fn concurrent_claims_never_share_a_message() {
    let db = setup_db_shared(5).await;
    let config = DeliveryConfig::default();

    for i in 0..6 {
        store::enqueue(&db.pool, &config, &new_message(Channel::Email, &format!("key-{i}")))
            .await
            .expect("enqueue");
    }

    let barrier = Arc::new(Barrier::new(2));

    let pool_a = db.pool.clone();
    let config_a = config.clone();
    let barrier_a = Arc::clone(&barrier);
    let task_a = tokio::spawn(async move {
        barrier_a.wait().await;
        store::claim_batch(&pool_a, &config_a, &[Channel::Email], 3).await
    });

    let pool_b = db.pool.clone();
    let config_b = config.clone();
    let barrier_b = Arc::clone(&barrier);
    let task_b = tokio::spawn(async move {
        barrier_b.wait().await;
        store::claim_batch(&pool_b, &config_b, &[Channel::Email], 3).await
    });

    let (batch_a, batch_b) = tokio::join!(task_a, task_b);
    let batch_a = batch_a.expect("join a").expect("claim a");
    let batch_b = batch_b.expect("join b").expect("claim b");

    let ids_a: HashSet<Uuid> = batch_a.iter().map(|m| m.id).collect();
    let ids_b: HashSet<Uuid> = batch_b.iter().map(|m| m.id).collect();
    assert!(ids_a.is_disjoint(&ids_b), "a message was claimed twice");
    assert_eq!(ids_a.len() + ids_b.len(), 6);
}

#[tokio::test]
async fn stuck_sending_messages_are_reclaimed_after_timeout() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let result = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "stuck"))
        .await
        .expect("enqueue");

    // Simulate a worker that claimed the row and crashed long ago.
    sqlx::query("UPDATE message_outbox SET status = 'sending', updated_at = ? WHERE id = ?")
        .bind(format_utc(
            Utc::now() - Duration::seconds(config.claim_timeout_secs + 60),
        ))
        .bind(result.message.id.to_string())
        .execute(&db.pool)
        .await
        .expect("force stuck sending");

    let claimed = store::claim_batch(&db.pool, &config, &[Channel::Email], 10)
        .await
        .expect("claim");

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, result.message.id);
}

#[tokio::test]
async fn recent_sending_messages_are_not_reclaimed() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let result = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "fresh"))
        .await
        .expect("enqueue");
    store::claim_batch(&db.pool, &config, &[Channel::Email], 10)
        .await
        .expect("first claim");

    let second = store::claim_batch(&db.pool, &config, &[Channel::Email], 10)
        .await
        .expect("second claim");
    assert!(second.is_empty());
    assert_eq!(status_of(&db.pool, result.message.id).await, "sending");
}

#[tokio::test]
async fn mark_sent_records_attempt_and_clears_error() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let result = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "sent-key"))
        .await
        .expect("enqueue");
    store::claim_batch(&db.pool, &config, &[Channel::Email], 10)
        .await
        .expect("claim");

    store::mark_sent(&db.pool, result.message.id, "provider-123", &timing())
        .await
        .expect("mark sent");

    let message = store::get_message(&db.pool, result.message.id)
        .await
        .expect("get message");
    assert_eq!(message.status, MessageStatus::Sent);
    assert!(message.status.is_terminal());
    assert_eq!(message.attempts, 1);
    assert!(message.last_error.is_none());

    let provider_id = sqlx::query_scalar::<_, Option<String>>(
        "SELECT provider_message_id FROM delivery_attempts WHERE message_id = ? AND attempt_no = 1",
    )
    .bind(result.message.id.to_string())
    .fetch_one(&db.pool)
    .await
    .expect("fetch attempt");
    assert_eq!(provider_id.as_deref(), Some("provider-123"));
}

#[tokio::test]
async fn mark_sent_without_claim_is_a_conflict() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let result = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "unclaimed"))
        .await
        .expect("enqueue");

    let err = store::mark_sent(&db.pool, result.message.id, "provider-123", &timing())
        .await
        .expect_err("must reject unclaimed transition");
    assert!(matches!(err, store::StoreError::Conflict(_)));
    assert_eq!(status_of(&db.pool, result.message.id).await, "pending");
}

#[tokio::test]
async fn mark_retry_requeues_with_future_attempt() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let result = store::enqueue(&db.pool, &config, &new_message(Channel::Sms, "retry-key"))
        .await
        .expect("enqueue");
    store::claim_batch(&db.pool, &config, &[Channel::Sms], 10)
        .await
        .expect("claim");

    let next_attempt_at = Utc::now() + Duration::seconds(90);
    store::mark_retry(
        &db.pool,
        result.message.id,
        DeliveryErrorKind::Timeout,
        "request timed out",
        next_attempt_at,
        &timing(),
    )
    .await
    .expect("mark retry");

    let message = store::get_message(&db.pool, result.message.id)
        .await
        .expect("get message");
    assert_eq!(message.status, MessageStatus::Pending);
    assert!(!message.status.is_terminal());
    assert_eq!(message.attempts, 1);
    assert_eq!(message.last_error.as_deref(), Some("request timed out"));
    assert_eq!(message.next_attempt_at, format_utc(next_attempt_at));

    // Not due yet, so a fresh claim must skip it.
    let claimed = store::claim_batch(&db.pool, &config, &[Channel::Sms], 10)
        .await
        .expect("claim after retry");
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn mark_dead_is_terminal_with_budget_note() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let result = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "dead-key"))
        .await
        .expect("enqueue");
    store::claim_batch(&db.pool, &config, &[Channel::Email], 10)
        .await
        .expect("claim");

    store::mark_dead(
        &db.pool,
        result.message.id,
        DeliveryErrorKind::Network,
        "connection refused",
        config.max_attempts,
        &timing(),
    )
    .await
    .expect("mark dead");

    let message = store::get_message(&db.pool, result.message.id)
        .await
        .expect("get message");
    assert_eq!(message.status, MessageStatus::Dead);
    assert!(message.status.is_terminal());
    let last_error = message.last_error.expect("last error");
    assert!(last_error.contains("max_attempts_exceeded (5)"));
    assert!(last_error.contains("connection refused"));
}

#[tokio::test]
async fn mark_failed_is_terminal() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let result = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "failed-key"))
        .await
        .expect("enqueue");
    store::claim_batch(&db.pool, &config, &[Channel::Email], 10)
        .await
        .expect("claim");

    store::mark_failed(
        &db.pool,
        result.message.id,
        DeliveryErrorKind::InvalidRecipient,
        "mailbox does not exist",
        &timing(),
    )
    .await
    .expect("mark failed");

    let message = store::get_message(&db.pool, result.message.id)
        .await
        .expect("get message");
    assert_eq!(message.status, MessageStatus::Failed);
    assert!(message.status.is_terminal());
    assert_eq!(message.last_error.as_deref(), Some("mailbox does not exist"));

    let claimed = store::claim_batch(&db.pool, &config, &[Channel::Email], 10)
        .await
        .expect("claim after failure");
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn terminal_row_blocks_reenqueue_within_retention() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let result = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "retained"))
        .await
        .expect("enqueue");
    store::claim_batch(&db.pool, &config, &[Channel::Email], 10)
        .await
        .expect("claim");
    store::mark_sent(&db.pool, result.message.id, "provider-1", &timing())
        .await
        .expect("mark sent");

    let again = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "retained"))
        .await
        .expect("re-enqueue");
    assert!(!again.created);
    assert_eq!(again.message.id, result.message.id);
}

#[tokio::test]
async fn terminal_row_outside_retention_allows_reenqueue() {
    let db = setup_db_shared(1).await;
    let config = DeliveryConfig::default();

    let result = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "expired"))
        .await
        .expect("enqueue");
    store::claim_batch(&db.pool, &config, &[Channel::Email], 10)
        .await
        .expect("claim");
    store::mark_sent(&db.pool, result.message.id, "provider-1", &timing())
        .await
        .expect("mark sent");

    sqlx::query("UPDATE message_outbox SET updated_at = ? WHERE id = ?")
        .bind(format_utc(
            Utc::now() - Duration::hours(config.dedupe_retention_hours + 1),
        ))
        .bind(result.message.id.to_string())
        .execute(&db.pool)
        .await
        .expect("age the sent row");

    let again = store::enqueue(&db.pool, &config, &new_message(Channel::Email, "expired"))
        .await
        .expect("re-enqueue");
    assert!(again.created);
    assert_ne!(again.message.id, result.message.id);
}
