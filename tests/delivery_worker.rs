use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use notifier::{
    outbox::{DeliveryConfig, format_utc, store},
    provider::{ProviderAdapter, ProviderError, ProviderReceipt, ProviderRegistry},
    types::{Channel, DeliveryErrorKind, MessageStatus, NewOutboxMessage, OutboxMessage},
    worker,
};
use sqlx::{
    Connection, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tempfile::NamedTempFile;

struct TestDb {
    pool: SqlitePool,
    _db_file: NamedTempFile,
}

async fn setup_db() -> TestDb {
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
        .max_connections(5)
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

#[derive(Clone)]
enum StubBehavior {
    Succeed,
    Transient(DeliveryErrorKind),
    Permanent(DeliveryErrorKind),
}

struct StubProvider {
    channel: Channel,
    behavior: StubBehavior,
    calls: AtomicUsize,
}

impl StubProvider {
    fn new(channel: Channel, behavior: StubBehavior) -> Arc<Self> {
        Arc::new(Self {
            channel,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ProviderAdapter for StubProvider {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &OutboxMessage) -> Result<ProviderReceipt, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            StubBehavior::Succeed => Ok(ProviderReceipt {
                provider_message_id: format!("stub-{}", message.id),
            }),
            StubBehavior::Transient(kind) => Err(ProviderError::Transient {
                kind: *kind,
                message: "stubbed transient failure".to_string(),
            }),
            StubBehavior::Permanent(kind) => Err(ProviderError::Permanent {
                kind: *kind,
                message: "stubbed permanent failure".to_string(),
            }),
        }
    }
}

fn registry_with(adapter: Arc<StubProvider>) -> ProviderRegistry {
    ProviderRegistry::new(vec![adapter])
}

async fn enqueue_email(pool: &SqlitePool, config: &DeliveryConfig, key: &str) -> OutboxMessage {
    store::enqueue(
        pool,
        config,
        &NewOutboxMessage {
            channel: Channel::Email,
            recipient: "patient@example.com".to_string(),
            subject: Some("Agendamento confirmado".to_string()),
            body: "<p>corpo</p>".to_string(),
            dedupe_key: key.to_string(),
        },
    )
    .await
    .expect("enqueue")
    .message
}

#[tokio::test]
async fn successful_send_marks_message_sent() {
    let db = setup_db().await;
    let config = DeliveryConfig::default();
    let adapter = StubProvider::new(Channel::Email, StubBehavior::Succeed);
    let registry = registry_with(Arc::clone(&adapter));

    let message = enqueue_email(&db.pool, &config, "ok-1").await;

    let outcome = worker::run_once(&db.pool, &config, &registry, "w1")
        .await
        .expect("run worker");

    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.sent, 1);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);

    let stored = store::get_message(&db.pool, message.id)
        .await
        .expect("get message");
    assert_eq!(stored.status, MessageStatus::Sent);
    assert_eq!(stored.attempts, 1);

    let provider_id: Option<String> = sqlx::query_scalar(
        "SELECT provider_message_id FROM delivery_attempts WHERE message_id = ?",
    )
    .bind(message.id.to_string())
    .fetch_one(&db.pool)
    .await
    .expect("fetch attempt");
    assert_eq!(provider_id, Some(format!("stub-{}", message.id)));
}

#[tokio::test]
async fn transient_failure_requeues_with_backoff() {
    let db = setup_db().await;
    let config = DeliveryConfig::default();
    let adapter = StubProvider::new(
        Channel::Email,
        StubBehavior::Transient(DeliveryErrorKind::Timeout),
    );
    let registry = registry_with(adapter);

    let message = enqueue_email(&db.pool, &config, "retry-1").await;

    let outcome = worker::run_once(&db.pool, &config, &registry, "w1")
        .await
        .expect("run worker");
    assert_eq!(outcome.retried, 1);

    let stored = store::get_message(&db.pool, message.id)
        .await
        .expect("get message");
    assert_eq!(stored.status, MessageStatus::Pending);
    assert_eq!(stored.attempts, 1);
    assert!(stored.next_attempt_at > format_utc(Utc::now()));

    let error_kind: Option<String> = sqlx::query_scalar(
        "SELECT error_kind FROM delivery_attempts WHERE message_id = ? AND attempt_no = 1",
    )
    .bind(message.id.to_string())
    .fetch_one(&db.pool)
    .await
    .expect("fetch attempt");
    assert_eq!(error_kind.as_deref(), Some("timeout"));

    // Backoff pushed the retry into the future, so nothing is claimable now.
    let outcome = worker::run_once(&db.pool, &config, &registry, "w1")
        .await
        .expect("second run");
    assert_eq!(outcome.claimed, 0);
}

#[tokio::test]
async fn permanent_failure_marks_message_failed() {
    let db = setup_db().await;
    let config = DeliveryConfig::default();
    let adapter = StubProvider::new(
        Channel::Email,
        StubBehavior::Permanent(DeliveryErrorKind::InvalidRecipient),
    );
    let registry = registry_with(Arc::clone(&adapter));

    let message = enqueue_email(&db.pool, &config, "perm-1").await;

    let outcome = worker::run_once(&db.pool, &config, &registry, "w1")
        .await
        .expect("run worker");
    assert_eq!(outcome.failed, 1);

    let stored = store::get_message(&db.pool, message.id)
        .await
        .expect("get message");
    assert_eq!(stored.status, MessageStatus::Failed);
    assert_eq!(stored.attempts, 1);

    // Terminal: a later run must not touch it again.
    let outcome = worker::run_once(&db.pool, &config, &registry, "w1")
        .await
        .expect("second run");
    assert_eq!(outcome.claimed, 0);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_retry_budget_moves_message_to_dead() {
    let db = setup_db().await;
    let config = DeliveryConfig::default();
    let adapter = StubProvider::new(
        Channel::Email,
        StubBehavior::Transient(DeliveryErrorKind::Network),
    );
    let registry = registry_with(adapter);

    let message = enqueue_email(&db.pool, &config, "dead-1").await;

    // Pretend four attempts already failed; the next one exhausts the budget.
    sqlx::query("UPDATE message_outbox SET attempts = ? WHERE id = ?")
        .bind(i64::from(config.max_attempts) - 1)
        .bind(message.id.to_string())
        .execute(&db.pool)
        .await
        .expect("bump attempts");

    let outcome = worker::run_once(&db.pool, &config, &registry, "w1")
        .await
        .expect("run worker");
    assert_eq!(outcome.dead, 1);

    let stored = store::get_message(&db.pool, message.id)
        .await
        .expect("get message");
    assert_eq!(stored.status, MessageStatus::Dead);
    assert_eq!(stored.attempts, i64::from(config.max_attempts));
    assert!(
        stored
            .last_error
            .expect("last error")
            .contains("max_attempts_exceeded")
    );
}

#[tokio::test]
async fn messages_for_unconfigured_channel_stay_pending() {
    let db = setup_db().await;
    let config = DeliveryConfig::default();
    // Only SMS is configured; the email message must not be claimed.
    let adapter = StubProvider::new(Channel::Sms, StubBehavior::Succeed);
    let registry = registry_with(Arc::clone(&adapter));

    let message = enqueue_email(&db.pool, &config, "waiting-1").await;

    let outcome = worker::run_once(&db.pool, &config, &registry, "w1")
        .await
        .expect("run worker");
    assert_eq!(outcome.claimed, 0);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);

    let stored = store::get_message(&db.pool, message.id)
        .await
        .expect("get message");
    assert_eq!(stored.status, MessageStatus::Pending);
    assert_eq!(stored.attempts, 0);
}

#[tokio::test]
async fn batch_mixes_outcomes_per_message() {
    let db = setup_db().await;
    let config = DeliveryConfig::default();
    let adapter = StubProvider::new(Channel::Email, StubBehavior::Succeed);
    let registry = registry_with(adapter);

    for i in 0..3 {
        enqueue_email(&db.pool, &config, &format!("batch-{i}")).await;
    }

    let outcome = worker::run_once(&db.pool, &config, &registry, "w1")
        .await
        .expect("run worker");
    assert_eq!(outcome.claimed, 3);
    assert_eq!(outcome.sent, 3);

    let sent: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM message_outbox WHERE status = 'sent'")
            .fetch_one(&db.pool)
            .await
            .expect("count sent");
    assert_eq!(sent, 3);
}
