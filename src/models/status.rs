use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::request::{Channel, NotificationRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Queued,
    Sending,
    Sent,
    Failed,
    DeadLettered,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Queued => "queued",
            DeliveryState::Sending => "sending",
            DeliveryState::Sent => "sent",
            DeliveryState::Failed => "failed",
            DeliveryState::DeadLettered => "dead_lettered",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DeliveryState::Queued),
            "sending" => Some(DeliveryState::Sending),
            "sent" => Some(DeliveryState::Sent),
            "failed" => Some(DeliveryState::Failed),
            "dead_lettered" => Some(DeliveryState::DeadLettered),
            _ => None,
        }
    }
}

impl Display for DeliveryState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle record for one notification. Inserted by the admission gateway
/// (state=queued), mutated only by the channel worker and the dead-letter
/// path, never deleted by the core outside admission rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub notification_id: Uuid,
    pub request_id: String,
    pub user_id: String,
    pub channel: Channel,
    pub state: DeliveryState,
    pub last_error: Option<String>,
    pub attempt_count: u32,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryStatus {
    pub fn queued(notification_id: Uuid, request: &NotificationRequest) -> Self {
        let now = Utc::now();

        Self {
            notification_id,
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            channel: request.channel,
            state: DeliveryState::Queued,
            last_error: None,
            attempt_count: 0,
            correlation_id: request.correlation_id.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}
