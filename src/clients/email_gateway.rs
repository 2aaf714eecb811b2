use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::SendError;
use crate::providers::{ProviderTransport, RenderedMessage};

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// HTTP mail relay transport for the email channel.
pub struct EmailGatewayClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    from_address: String,
}

impl EmailGatewayClient {
    pub fn new(
        base_url: String,
        api_key: String,
        from_address: String,
        timeout: Duration,
    ) -> Result<Self, SendError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SendError::Transient(e.to_string()))?;

        info!(base_url = %base_url, "Email gateway client initialized");

        Ok(Self {
            http_client,
            base_url,
            api_key,
            from_address,
        })
    }
}

#[async_trait]
impl ProviderTransport for EmailGatewayClient {
    fn name(&self) -> &str {
        "email_gateway"
    }

    async fn send(&self, address: &str, message: &RenderedMessage) -> Result<(), SendError> {
        let url = format!("{}/api/v1/mail/send", self.base_url);

        let payload = EmailPayload {
            from: &self.from_address,
            to: address,
            subject: message.subject.as_deref().unwrap_or_default(),
            body: &message.body,
        };

        debug!(to = address, "Sending email via gateway");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SendError::Transient(e.to_string()))?;

        classify_response(response.status())
    }
}

/// Shared status-code classification for HTTP provider gateways: overload
/// and server-side failures are retryable, other client errors are not.
pub(crate) fn classify_response(status: reqwest::StatusCode) -> Result<(), SendError> {
    if status.is_success() {
        return Ok(());
    }

    if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
        return Err(SendError::Transient(format!("provider returned {}", status)));
    }

    Err(SendError::Permanent(format!("provider returned {}", status)))
}
