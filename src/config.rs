use chrono::{FixedOffset, Offset, Utc};

use crate::outbox::{DeliveryConfig, ReminderConfig};
use crate::phone::PhoneConfig;
use crate::provider::{EmailProviderConfig, SmsProviderConfig};

/// Process-wide configuration, read once at startup. Every knob has a
/// development default; secrets default to absent, which disables the
/// corresponding feature with a startup warning rather than failing.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    /// HMAC secret for webhook signatures. `None` disables verification.
    pub webhook_secret: Option<String>,
    /// Bearer token for the admin routes. `None` disables the guard.
    pub admin_api_token: Option<String>,
    pub email_provider: Option<EmailProviderConfig>,
    pub sms_provider: Option<SmsProviderConfig>,
    pub phone: PhoneConfig,
    /// Clinic wall-clock offset from UTC, in whole hours.
    pub clinic_utc_offset_hours: i32,
    /// Inbox that receives contact-form notifications.
    pub contact_recipient: String,
    pub delivery: DeliveryConfig,
    pub reminder: ReminderConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("NOTIFIER_BIND_ADDR")
            && !value.is_empty()
        {
            config.bind_addr = value;
        }
        if let Ok(value) = std::env::var("NOTIFIER_DATABASE_URL")
            && !value.is_empty()
        {
            config.database_url = value;
        }
        if let Ok(value) = std::env::var("NOTIFIER_WEBHOOK_SECRET")
            && !value.is_empty()
        {
            config.webhook_secret = Some(value);
        }
        if let Ok(value) = std::env::var("NOTIFIER_ADMIN_API_TOKEN")
            && !value.is_empty()
        {
            config.admin_api_token = Some(value);
        }

        if let Ok(api_key) = std::env::var("NOTIFIER_EMAIL_API_KEY")
            && let Ok(from) = std::env::var("NOTIFIER_EMAIL_FROM")
            && !api_key.is_empty()
            && !from.is_empty()
        {
            let mut provider = EmailProviderConfig::new(api_key, from);
            if let Ok(base_url) = std::env::var("NOTIFIER_EMAIL_BASE_URL")
                && !base_url.is_empty()
            {
                provider.base_url = base_url;
            }
            config.email_provider = Some(provider);
        }

        if let Ok(api_token) = std::env::var("NOTIFIER_SMS_API_TOKEN")
            && let Ok(from) = std::env::var("NOTIFIER_SMS_FROM")
            && !api_token.is_empty()
            && !from.is_empty()
        {
            let mut provider = SmsProviderConfig::new(api_token, from);
            if let Ok(base_url) = std::env::var("NOTIFIER_SMS_BASE_URL")
                && !base_url.is_empty()
            {
                provider.base_url = base_url;
            }
            config.sms_provider = Some(provider);
        }

        if let Ok(value) = std::env::var("NOTIFIER_PHONE_COUNTRY_CODE")
            && !value.is_empty()
            && value.chars().all(|c| c.is_ascii_digit())
        {
            config.phone.country_code = value;
        }
        if let Ok(value) = std::env::var("NOTIFIER_PHONE_DEFAULT_AREA_CODE")
            && value.len() == 2
            && value.chars().all(|c| c.is_ascii_digit())
        {
            config.phone.default_area_code = value;
        }

        if let Ok(value) = std::env::var("NOTIFIER_CLINIC_UTC_OFFSET_HOURS")
            && let Ok(parsed) = value.parse::<i32>()
        {
            config.clinic_utc_offset_hours = parsed.clamp(-12, 14);
        }
        if let Ok(value) = std::env::var("NOTIFIER_CONTACT_RECIPIENT")
            && !value.is_empty()
        {
            config.contact_recipient = value;
        }

        config.delivery = DeliveryConfig::from_env();
        config.reminder = ReminderConfig::from_env();

        config
    }

    pub fn clinic_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.clinic_utc_offset_hours.clamp(-12, 14) * 3600)
            .unwrap_or_else(|| Utc.fix())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3001".to_string(),
            database_url: "sqlite://notifier.db".to_string(),
            webhook_secret: None,
            admin_api_token: None,
            email_provider: None,
            sms_provider: None,
            phone: PhoneConfig::default(),
            // Brasília time; the clinic does not observe DST.
            clinic_utc_offset_hours: -3,
            contact_recipient: "contato@clinica.example".to_string(),
            delivery: DeliveryConfig::default(),
            reminder: ReminderConfig::default(),
        }
    }
}
