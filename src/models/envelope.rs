use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::request::NotificationRequest;

/// The unit of work carried by the broker: an admitted request plus delivery
/// metadata. Ownership passes to exactly one worker instance per attempt;
/// redelivery after a crash or nack is possible, so the status row (not this
/// counter) is the authoritative attempt record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub notification_id: Uuid,
    pub request: NotificationRequest,
    pub attempt_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl NotificationEnvelope {
    pub fn new(notification_id: Uuid, request: NotificationRequest) -> Self {
        Self {
            notification_id,
            request,
            attempt_count: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// Terminal record published to the dead-letter queue. Never dropped by the
/// core; an operator or replay tool is the only recovery path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub envelope: NotificationEnvelope,
    pub failure_reason: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterMessage {
    pub fn new(envelope: NotificationEnvelope, failure_reason: impl Into<String>) -> Self {
        Self {
            envelope,
            failure_reason: failure_reason.into(),
            failed_at: Utc::now(),
        }
    }
}
