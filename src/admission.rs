//! Admission gateway: validates, deduplicates, rate-limits, and publishes
//! incoming notification requests.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::AdmitError;
use crate::models::envelope::NotificationEnvelope;
use crate::models::request::{AdmitRequest, NotificationRequest};
use crate::models::status::{DeliveryState, DeliveryStatus};
use crate::store::{IdempotencyStore, RateLimiter, StatusStore};

/// Immediate acknowledgment returned to the caller.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub notification_id: Uuid,
    pub state: DeliveryState,
    pub correlation_id: String,
    pub remaining_requests: u64,
    /// True when the request_id had already been admitted; nothing was
    /// re-published.
    pub duplicate: bool,
}

pub struct AdmissionGateway {
    broker: Arc<dyn Broker>,
    statuses: Arc<dyn StatusStore>,
    idempotency: IdempotencyStore,
    limiter: RateLimiter,
}

impl AdmissionGateway {
    pub fn new(
        broker: Arc<dyn Broker>,
        statuses: Arc<dyn StatusStore>,
        idempotency: IdempotencyStore,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            broker,
            statuses,
            idempotency,
            limiter,
        }
    }

    pub async fn admit(&self, request: AdmitRequest) -> Result<Admitted, AdmitError> {
        request.validate()?;

        let request = NotificationRequest::from_admit(request);

        // Duplicate fast path: an already-admitted request_id returns the
        // original acknowledgment without touching the rate window.
        if let Some(existing) = self
            .idempotency
            .lookup(&request.request_id)
            .await
            .map_err(|e| AdmitError::Unavailable(e.to_string()))?
        {
            return self.answer_duplicate(&request, existing).await;
        }

        let decision = self
            .limiter
            .check(&request.user_id)
            .await
            .map_err(|e| AdmitError::Unavailable(e.to_string()))?;

        if !decision.allowed {
            return Err(AdmitError::RateLimited {
                user_id: request.user_id.clone(),
                remaining: 0,
            });
        }

        let notification_id = Uuid::new_v4();

        let reserved = self
            .idempotency
            .reserve(&request.request_id, notification_id)
            .await
            .map_err(|e| AdmitError::Unavailable(e.to_string()))?;

        if !reserved {
            // A concurrent identical request won the reservation.
            let existing = self
                .idempotency
                .lookup(&request.request_id)
                .await
                .map_err(|e| AdmitError::Unavailable(e.to_string()))?
                .unwrap_or(notification_id);

            return self.answer_duplicate(&request, existing).await;
        }

        let status = DeliveryStatus::queued(notification_id, &request);

        self.statuses
            .insert(&status)
            .await
            .map_err(|e| AdmitError::Unavailable(e.to_string()))?;

        let envelope = NotificationEnvelope::new(notification_id, request.clone());

        if let Err(e) = self.broker.publish(request.channel, &envelope).await {
            // Roll back so a client retry with the same request_id can
            // succeed once the broker recovers.
            warn!(
                request_id = %request.request_id,
                error = %e,
                "Publish failed, rolling back admission"
            );

            let _ = self.statuses.delete(notification_id).await;
            let _ = self.idempotency.release(&request.request_id).await;

            return Err(AdmitError::Unavailable(e.to_string()));
        }

        info!(
            request_id = %request.request_id,
            notification_id = %notification_id,
            correlation_id = %request.correlation_id,
            channel = %request.channel,
            "Notification admitted"
        );

        Ok(Admitted {
            notification_id,
            state: DeliveryState::Queued,
            correlation_id: request.correlation_id,
            remaining_requests: decision.remaining,
            duplicate: false,
        })
    }

    async fn answer_duplicate(
        &self,
        request: &NotificationRequest,
        notification_id: Uuid,
    ) -> Result<Admitted, AdmitError> {
        let state = self
            .statuses
            .get(notification_id)
            .await
            .map_err(|e| AdmitError::Unavailable(e.to_string()))?
            .map(|s| s.state)
            .unwrap_or(DeliveryState::Queued);

        let remaining = self
            .limiter
            .remaining(&request.user_id)
            .await
            .map_err(|e| AdmitError::Unavailable(e.to_string()))?;

        info!(
            request_id = %request.request_id,
            notification_id = %notification_id,
            "Duplicate admission suppressed"
        );

        Ok(Admitted {
            notification_id,
            state,
            correlation_id: request.correlation_id.clone(),
            remaining_requests: remaining,
            duplicate: true,
        })
    }
}
