//! Collaborator seams consumed by the channel workers.
//!
//! The core never branches on provider identity, only on transient vs
//! permanent outcomes; channel-specific transports are supplied at wiring
//! time.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, RenderError, SendError};
use crate::models::request::Channel;

/// Message content produced by template rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body: String,
}

/// User/preference lookup: resolves where a notification should be sent.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn delivery_address(
        &self,
        user_id: &str,
        channel: Channel,
    ) -> Result<String, DirectoryError>;
}

/// Template rendering: side-effect-free, `InvalidTemplate` is permanent.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(
        &self,
        template_code: &str,
        variables: &HashMap<String, String>,
    ) -> Result<RenderedMessage, RenderError>;
}

/// Provider transport (SMTP relay, push gateway). One capability per
/// channel; outcome classification is the adapter's responsibility.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Provider identity used for circuit breaker state and logging.
    fn name(&self) -> &str;

    async fn send(&self, address: &str, message: &RenderedMessage) -> Result<(), SendError>;
}
