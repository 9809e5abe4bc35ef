use serde::{Deserialize, Serialize};

/// Appointment row as mirrored from the upstream scheduling system. The
/// webhook ingress upserts it; the reminder scheduler only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub patient_name: String,
    pub patient_email: Option<String>,
    /// Normalized dialable phone, see `phone::normalize`.
    pub patient_phone: Option<String>,
    pub service_type: String,
    /// ISO date, `YYYY-MM-DD`.
    pub appointment_date: String,
    /// `HH:MM`, clinic-local time.
    pub appointment_time: String,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::NoShow => "no-show",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "completed" => Some(AppointmentStatus::Completed),
            "no-show" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }
}
