//! Background delivery loop. Claims due outbox messages, pushes them
//! through the configured provider adapters, and applies the retry
//! policy: transient failures back off and re-queue, permanent failures
//! go to `failed`, exhausted budgets go to `dead`.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::outbox::store;
use crate::outbox::{AttemptTiming, DeliveryConfig, StoreError, backoff_delay, format_utc};
use crate::provider::{ProviderError, ProviderRegistry};
use crate::types::OutboxMessage;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub dead: usize,
}

/// One claim-and-deliver cycle. Returns how the batch was dispositioned.
pub async fn run_once(
    pool: &SqlitePool,
    config: &DeliveryConfig,
    registry: &ProviderRegistry,
    worker_id: &str,
) -> Result<BatchOutcome, StoreError> {
    let channels = registry.channels();
    let batch = store::claim_batch(pool, config, &channels, config.batch_size).await?;

    let mut outcome = BatchOutcome {
        claimed: batch.len(),
        ..BatchOutcome::default()
    };

    for message in &batch {
        deliver_one(pool, config, registry, worker_id, message, &mut outcome).await?;
    }

    if outcome.claimed > 0 {
        info!(
            worker_id,
            claimed = outcome.claimed,
            sent = outcome.sent,
            retried = outcome.retried,
            failed = outcome.failed,
            dead = outcome.dead,
            "delivery batch complete"
        );
    }

    Ok(outcome)
}

async fn deliver_one(
    pool: &SqlitePool,
    config: &DeliveryConfig,
    registry: &ProviderRegistry,
    worker_id: &str,
    message: &OutboxMessage,
    outcome: &mut BatchOutcome,
) -> Result<(), StoreError> {
    let Some(adapter) = registry.get(message.channel) else {
        // claim_batch filters on registered channels, so this only fires
        // if the registry changed mid-batch. Leave the row to the stuck-
        // sending sweep.
        warn!(
            message_id = %message.id,
            channel = message.channel.as_str(),
            "claimed message has no provider adapter"
        );
        return Ok(());
    };

    let started_at = format_utc(Utc::now());
    let result = adapter.send(message).await;
    let timing = AttemptTiming {
        started_at,
        finished_at: format_utc(Utc::now()),
    };

    let attempt_no = message.attempts + 1;

    match result {
        Ok(receipt) => {
            store::mark_sent(pool, message.id, &receipt.provider_message_id, &timing).await?;
            outcome.sent += 1;
            info!(
                worker_id,
                message_id = %message.id,
                channel = message.channel.as_str(),
                attempt_no,
                provider_message_id = %receipt.provider_message_id,
                "message delivered"
            );
        }
        Err(ProviderError::Transient { kind, message: err }) => {
            if attempt_no >= i64::from(config.max_attempts) {
                store::mark_dead(pool, message.id, kind, &err, config.max_attempts, &timing)
                    .await?;
                outcome.dead += 1;
                error!(
                    worker_id,
                    message_id = %message.id,
                    channel = message.channel.as_str(),
                    attempt_no,
                    error_kind = kind.as_str(),
                    error = %err,
                    "retry budget exhausted, message moved to dead"
                );
            } else {
                let next_attempt_at = Utc::now() + backoff_delay(message.channel, attempt_no);
                store::mark_retry(pool, message.id, kind, &err, next_attempt_at, &timing)
                    .await?;
                outcome.retried += 1;
                warn!(
                    worker_id,
                    message_id = %message.id,
                    channel = message.channel.as_str(),
                    attempt_no,
                    error_kind = kind.as_str(),
                    error = %err,
                    next_attempt_at = %format_utc(next_attempt_at),
                    "transient delivery failure, retry scheduled"
                );
            }
        }
        Err(ProviderError::Permanent { kind, message: err }) => {
            store::mark_failed(pool, message.id, kind, &err, &timing).await?;
            outcome.failed += 1;
            error!(
                worker_id,
                message_id = %message.id,
                channel = message.channel.as_str(),
                attempt_no,
                error_kind = kind.as_str(),
                error = %err,
                "permanent delivery failure"
            );
        }
    }

    Ok(())
}

/// Long-running polling loop for a spawned task. Store errors are logged
/// and the loop keeps going; a broken database should not kill the task
/// while the HTTP surface is still up.
pub async fn run(
    pool: SqlitePool,
    config: DeliveryConfig,
    registry: ProviderRegistry,
    worker_id: String,
) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(config.poll_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        worker_id,
        poll_interval_secs = config.poll_interval_secs,
        batch_size = config.batch_size,
        "delivery worker started"
    );

    loop {
        interval.tick().await;
        if let Err(err) = run_once(&pool, &config, &registry, &worker_id).await {
            error!(worker_id, error = %err, "delivery batch failed");
        }
    }
}
