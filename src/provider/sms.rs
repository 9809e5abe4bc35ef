use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Channel, OutboxMessage};

use super::{ProviderAdapter, ProviderError, ProviderReceipt};

#[derive(Debug, Clone)]
pub struct SmsProviderConfig {
    pub api_token: String,
    pub base_url: String,
    pub from: String,
    pub timeout_secs: u64,
}

impl SmsProviderConfig {
    pub fn new(api_token: String, from: String) -> Self {
        Self {
            api_token,
            base_url: "https://api.zenvia.com/v2".to_string(),
            from,
            timeout_secs: 10,
        }
    }
}

/// SMS transport (Zenvia-compatible API).
pub struct SmsProvider {
    config: SmsProviderConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendSmsRequest<'a> {
    from: &'a str,
    to: &'a str,
    contents: [SmsContent<'a>; 1],
}

#[derive(Serialize)]
struct SmsContent<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SendSmsResponse {
    id: String,
}

impl SmsProvider {
    pub fn new(config: SmsProviderConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ProviderAdapter for SmsProvider {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, message: &OutboxMessage) -> Result<ProviderReceipt, ProviderError> {
        let request = SendSmsRequest {
            from: &self.config.from,
            to: &message.recipient,
            contents: [SmsContent {
                content_type: "text",
                text: &message.body,
            }],
        };

        let response = self
            .client
            .post(format!("{}/channels/sms/messages", self.config.base_url))
            .header("X-API-TOKEN", &self.config.api_token)
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::from_reqwest(&err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        let body: SendSmsResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::from_reqwest(&err))?;

        Ok(ProviderReceipt {
            provider_message_id: body.id,
        })
    }
}
