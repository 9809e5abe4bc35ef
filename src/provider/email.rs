use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Channel, OutboxMessage};

use super::{ProviderAdapter, ProviderError, ProviderReceipt};

#[derive(Debug, Clone)]
pub struct EmailProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub from: String,
    pub timeout_secs: u64,
}

impl EmailProviderConfig {
    pub fn new(api_key: String, from: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.resend.com".to_string(),
            from,
            timeout_secs: 10,
        }
    }
}

/// Transactional email transport (Resend-compatible API).
pub struct EmailProvider {
    config: EmailProviderConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct SendEmailResponse {
    id: String,
}

impl EmailProvider {
    pub fn new(config: EmailProviderConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ProviderAdapter for EmailProvider {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, message: &OutboxMessage) -> Result<ProviderReceipt, ProviderError> {
        let request = SendEmailRequest {
            from: &self.config.from,
            to: [message.recipient.as_str()],
            subject: message.subject.as_deref().unwrap_or_default(),
            html: &message.body,
        };

        let response = self
            .client
            .post(format!("{}/emails", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::from_reqwest(&err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        let body: SendEmailResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::from_reqwest(&err))?;

        Ok(ProviderReceipt {
            provider_message_id: body.id,
        })
    }
}
