//! Reminder scheduler. Periodically scans upcoming appointments and
//! enqueues 24h and 2h reminders whose target instant falls inside the
//! current polling window. Dedupe keys make a double scan harmless, so
//! the scheduler itself keeps no state between runs.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::outbox::{DeliveryConfig, ReminderConfig, StoreError, store};
use crate::templates::{self, AppointmentSummary};
use crate::types::{Appointment, AppointmentStatus, Channel, NewOutboxMessage};

const LEAD_TIMES_HOURS: [i64; 2] = [24, 2];

/// Interprets the clinic-local `appointment_date` + `appointment_time`
/// as a UTC instant. Returns `None` for malformed values rather than
/// failing the whole scan.
pub fn appointment_instant(
    date: &str,
    time: &str,
    clinic_offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M").ok()?;
    let local = clinic_offset
        .from_local_datetime(&date.and_time(time))
        .single()?;
    Some(local.with_timezone(&Utc))
}

/// One scan. Returns the number of reminder messages actually enqueued
/// (idempotent no-ops are not counted).
pub async fn run_once(
    pool: &SqlitePool,
    reminder_config: &ReminderConfig,
    delivery_config: &DeliveryConfig,
    clinic_offset: FixedOffset,
) -> Result<usize, StoreError> {
    let now = Utc::now();
    let window = Duration::minutes(reminder_config.window_minutes);

    // Everything further out than max lead + window cannot match yet.
    let horizon = now + Duration::hours(LEAD_TIMES_HOURS[0]) + window;
    let horizon_date = horizon
        .with_timezone(&clinic_offset)
        .date_naive()
        .format("%Y-%m-%d")
        .to_string();

    let appointments = sqlx::query_as::<_, AppointmentRow>(
        r#"
        SELECT *
        FROM appointments
        WHERE status IN ('scheduled', 'confirmed')
          AND appointment_date <= ?
        "#,
    )
    .bind(&horizon_date)
    .fetch_all(pool)
    .await?;

    let mut enqueued = 0;

    for row in appointments {
        let appointment = match Appointment::try_from(row) {
            Ok(appointment) => appointment,
            Err(err) => {
                warn!(error = %err, "skipping corrupt appointment row");
                continue;
            }
        };

        let Some(instant) = appointment_instant(
            &appointment.appointment_date,
            &appointment.appointment_time,
            clinic_offset,
        ) else {
            warn!(
                appointment_id = %appointment.id,
                date = %appointment.appointment_date,
                time = %appointment.appointment_time,
                "skipping appointment with unparseable date/time"
            );
            continue;
        };

        for lead_hours in LEAD_TIMES_HOURS {
            let target = instant - Duration::hours(lead_hours);
            if now < target - window || now > target + window {
                continue;
            }
            enqueued +=
                enqueue_reminders(pool, delivery_config, &appointment, lead_hours).await?;
        }
    }

    if enqueued > 0 {
        info!(enqueued, "reminder scan enqueued messages");
    }

    Ok(enqueued)
}

async fn enqueue_reminders(
    pool: &SqlitePool,
    delivery_config: &DeliveryConfig,
    appointment: &Appointment,
    lead_hours: i64,
) -> Result<usize, StoreError> {
    let summary = AppointmentSummary {
        patient_name: &appointment.patient_name,
        service_type: &appointment.service_type,
        appointment_date: &appointment.appointment_date,
        appointment_time: &appointment.appointment_time,
    };

    let mut enqueued = 0;

    if let Some(email) = &appointment.patient_email {
        let rendered = templates::reminder_email(&summary, lead_hours);
        let result = store::enqueue(
            pool,
            delivery_config,
            &NewOutboxMessage {
                channel: Channel::Email,
                recipient: email.clone(),
                subject: Some(rendered.subject),
                body: rendered.html,
                dedupe_key: reminder_dedupe_key(&appointment.id, lead_hours, Channel::Email),
            },
        )
        .await?;
        if result.created {
            enqueued += 1;
        }
    }

    if let Some(phone) = &appointment.patient_phone {
        let body = templates::reminder_sms(&summary, lead_hours);
        let result = store::enqueue(
            pool,
            delivery_config,
            &NewOutboxMessage {
                channel: Channel::Sms,
                recipient: phone.clone(),
                subject: None,
                body,
                dedupe_key: reminder_dedupe_key(&appointment.id, lead_hours, Channel::Sms),
            },
        )
        .await?;
        if result.created {
            enqueued += 1;
        }
    }

    Ok(enqueued)
}

fn reminder_dedupe_key(appointment_id: &str, lead_hours: i64, channel: Channel) -> String {
    format!(
        "reminder_{appointment_id}_{lead_hours}h_{}",
        channel.as_str()
    )
}

/// Long-running polling loop for a spawned task.
pub async fn run(
    pool: SqlitePool,
    reminder_config: ReminderConfig,
    delivery_config: DeliveryConfig,
    clinic_offset: FixedOffset,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(
        reminder_config.poll_interval_secs,
    ));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        poll_interval_secs = reminder_config.poll_interval_secs,
        window_minutes = reminder_config.window_minutes,
        "reminder scheduler started"
    );

    loop {
        interval.tick().await;
        if let Err(err) = run_once(&pool, &reminder_config, &delivery_config, clinic_offset).await
        {
            error!(error = %err, "reminder scan failed");
        }
    }
}

#[derive(sqlx::FromRow)]
struct AppointmentRow {
    id: String,
    patient_name: String,
    patient_email: Option<String>,
    patient_phone: Option<String>,
    service_type: String,
    appointment_date: String,
    appointment_time: String,
    status: String,
    notes: Option<String>,
    updated_at: String,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let status = AppointmentStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Parse(format!("unknown appointment status: {}", row.status)))?;

        Ok(Appointment {
            id: row.id,
            patient_name: row.patient_name,
            patient_email: row.patient_email,
            patient_phone: row.patient_phone,
            service_type: row.service_type,
            appointment_date: row.appointment_date,
            appointment_time: row.appointment_time,
            status,
            notes: row.notes,
            updated_at: row.updated_at,
        })
    }
}
