use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AdmitError;

/// Delivery channel a notification is routed through. Each channel has its
/// own durable queue and its own worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub fn queue_name(&self) -> &'static str {
        match self {
            Channel::Email => "email.queue",
            Channel::Push => "push.queue",
        }
    }

    pub fn retry_queue_name(&self) -> &'static str {
        match self {
            Channel::Email => "email.retry.queue",
            Channel::Push => "push.retry.queue",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Channel::Email),
            "push" => Some(Channel::Push),
            _ => None,
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Incoming admission payload, as accepted by the API surface. `request_id`
/// and `correlation_id` are generated server-side when the client omits them.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmitRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub user_id: String,
    pub channel: Channel,
    pub template_code: String,

    #[serde(default)]
    pub variables: HashMap<String, String>,

    #[serde(default)]
    pub priority: u8,

    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl AdmitRequest {
    pub fn validate(&self) -> Result<(), AdmitError> {
        if self.user_id.trim().is_empty() {
            return Err(AdmitError::InvalidRequest("user_id is required".into()));
        }

        if self.template_code.trim().is_empty() {
            return Err(AdmitError::InvalidRequest(
                "template_code is required".into(),
            ));
        }

        if let Some(request_id) = &self.request_id {
            if request_id.trim().is_empty() {
                return Err(AdmitError::InvalidRequest(
                    "request_id must not be blank when provided".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Immutable notification request as admitted into the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub request_id: String,
    pub user_id: String,
    pub channel: Channel,
    pub template_code: String,
    pub variables: HashMap<String, String>,

    /// Reserved for future queue prioritization; never reorders within a queue.
    pub priority: u8,

    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationRequest {
    pub fn from_admit(req: AdmitRequest) -> Self {
        Self {
            request_id: req
                .request_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: req.user_id,
            channel: req.channel,
            template_code: req.template_code,
            variables: req.variables,
            priority: req.priority,
            correlation_id: req
                .correlation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            created_at: Utc::now(),
        }
    }
}
