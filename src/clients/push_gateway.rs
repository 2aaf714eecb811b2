use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::clients::email_gateway::classify_response;
use crate::error::SendError;
use crate::providers::{ProviderTransport, RenderedMessage};

#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    include_player_ids: [&'a str; 1],

    #[serde(skip_serializing_if = "Option::is_none")]
    headings: Option<&'a str>,

    contents: &'a str,
}

/// Push gateway transport (OneSignal-style REST API).
pub struct PushGatewayClient {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl PushGatewayClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, SendError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SendError::Transient(e.to_string()))?;

        info!(base_url = %base_url, "Push gateway client initialized");

        Ok(Self {
            http_client,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl ProviderTransport for PushGatewayClient {
    fn name(&self) -> &str {
        "push_gateway"
    }

    async fn send(&self, address: &str, message: &RenderedMessage) -> Result<(), SendError> {
        let url = format!("{}/notifications", self.base_url);

        let payload = PushPayload {
            include_player_ids: [address],
            headings: message.subject.as_deref(),
            contents: &message.body,
        };

        debug!(device = address, "Sending push via gateway");

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
