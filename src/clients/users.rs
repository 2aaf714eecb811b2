use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::DirectoryError;
use crate::models::request::Channel;
use crate::providers::UserDirectory;

#[derive(Debug, Deserialize)]
struct ContactResponse {
    address: String,
}

/// User service adapter resolving delivery addresses per user and channel.
pub struct UserServiceClient {
    http_client: Client,
    base_url: String,
}

impl UserServiceClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, DirectoryError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        info!(base_url = %base_url, "User service client initialized");

        Ok(Self {
            http_client,
            base_url,
        })
    }
}

#[async_trait]
impl UserDirectory for UserServiceClient {
    async fn delivery_address(
        &self,
        user_id: &str,
        channel: Channel,
    ) -> Result<String, DirectoryError> {
        let url = format!(
            "{}/api/v1/users/{}/contacts?channel={}",
            self.base_url, user_id, channel
        );

        debug!(user_id, channel = %channel, "Resolving delivery address");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(DirectoryError::NotFound {
                user_id: user_id.to_string(),
                channel: channel.to_string(),
            }),
            status if status.is_success() => {
                let contact: ContactResponse = response
                    .json()
                    .await
                    .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

                Ok(contact.address)
            }
            status => Err(DirectoryError::Unavailable(format!(
                "user service returned {}",
                status
            ))),
        }
    }
}
