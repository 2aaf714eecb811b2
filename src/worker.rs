//! Channel worker: consumes envelopes from one channel's queue, drives the
//! provider send under circuit-breaker protection, and owns the
//! retry/backoff and dead-letter paths.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result};
use futures_util::StreamExt;
use thiserror::Error as ThisError;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::clients::circuit_breaker::CircuitBreaker;
use crate::clients::rbmq::RabbitMqBroker;
use crate::error::{BrokerError, DirectoryError, RenderError, SendError, StoreError};
use crate::models::circuit_breaker::CircuitDecision;
use crate::models::envelope::{DeadLetterMessage, NotificationEnvelope};
use crate::models::request::Channel;
use crate::models::retry::RetryConfig;
use crate::models::status::DeliveryState;
use crate::providers::{ProviderTransport, TemplateRenderer, UserDirectory};
use crate::store::StatusStore;

/// Terminal disposition of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Delivered,
    /// Transient failure; the envelope was requeued for redelivery.
    Scheduled { delay: Duration },
    /// Permanent failure or attempt bound reached; routed to the
    /// dead-letter queue.
    DeadLettered { reason: String },
}

/// Infrastructure failures while processing. The message is nacked and
/// redelivered; the attempt record in the status row keeps the bound intact.
#[derive(ThisError, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

enum AttemptFailure {
    Transient(String),
    Permanent(String),
}

pub struct ChannelWorker {
    channel: Channel,
    broker: Arc<dyn Broker>,
    statuses: Arc<dyn StatusStore>,
    directory: Arc<dyn UserDirectory>,
    renderer: Arc<dyn TemplateRenderer>,
    transport: Arc<dyn ProviderTransport>,
    breaker: CircuitBreaker,
    retry_config: RetryConfig,
    provider_timeout: Duration,
}

impl ChannelWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: Channel,
        broker: Arc<dyn Broker>,
        statuses: Arc<dyn StatusStore>,
        directory: Arc<dyn UserDirectory>,
        renderer: Arc<dyn TemplateRenderer>,
        transport: Arc<dyn ProviderTransport>,
        breaker: CircuitBreaker,
        retry_config: RetryConfig,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            broker,
            statuses,
            directory,
            renderer,
            transport,
            breaker,
            retry_config,
            provider_timeout,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Process one consumed envelope to a terminal disposition. The status
    /// row, not the envelope, is the authoritative attempt counter: a stale
    /// counter on a redelivered envelope never resets the bound.
    pub async fn process(
        &self,
        envelope: NotificationEnvelope,
    ) -> Result<ProcessOutcome, ProcessError> {
        let notification_id = envelope.notification_id;

        let recorded = self
            .statuses
            .get(notification_id)
            .await?
            .map(|s| s.attempt_count)
            .unwrap_or(envelope.attempt_count);

        let attempt = recorded.max(envelope.attempt_count) + 1;

        self.statuses
            .mark(notification_id, DeliveryState::Sending, None, recorded)
            .await?;

        match self.attempt_send(&envelope).await {
            Ok(()) => {
                self.statuses
                    .mark(notification_id, DeliveryState::Sent, None, attempt)
                    .await?;

                info!(
                    notification_id = %notification_id,
                    correlation_id = %envelope.request.correlation_id,
                    channel = %self.channel,
                    attempt,
                    "Notification delivered"
                );

                Ok(ProcessOutcome::Delivered)
            }
            Err(AttemptFailure::Permanent(reason)) => {
                self.dead_letter(envelope, attempt, reason).await
            }
            Err(AttemptFailure::Transient(reason)) => {
                if attempt >= self.retry_config.max_attempts {
                    return self.dead_letter(envelope, attempt, reason).await;
                }

                let delay = self.retry_config.delay_for_attempt(attempt);

                let mut requeued = envelope.clone();
                requeued.attempt_count = attempt;

                self.broker
                    .publish_retry(self.channel, &requeued, delay)
                    .await?;

                self.statuses
                    .mark(
                        notification_id,
                        DeliveryState::Failed,
                        Some(&reason),
                        attempt,
                    )
                    .await?;

                warn!(
                    notification_id = %notification_id,
                    correlation_id = %envelope.request.correlation_id,
                    attempt,
                    max_attempts = self.retry_config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "Delivery attempt failed, redelivery scheduled"
                );

                Ok(ProcessOutcome::Scheduled { delay })
            }
        }
    }

    async fn attempt_send(&self, envelope: &NotificationEnvelope) -> Result<(), AttemptFailure> {
        let decision = self
            .breaker
            .acquire()
            .await
            .map_err(|e| AttemptFailure::Transient(e.to_string()))?;

        let trial = match decision {
            CircuitDecision::Reject => {
                return Err(AttemptFailure::Transient(format!(
                    "circuit breaker open for {}",
                    self.transport.name()
                )));
            }
            CircuitDecision::Allow { trial } => trial,
        };

        // Collaborator lookups: their failures say nothing about provider
        // health, so they never touch the breaker. A won trial permit is
        // returned so another worker can probe.
        let request = &envelope.request;

        let address = match self
            .directory
            .delivery_address(&request.user_id, self.channel)
            .await
        {
            Ok(address) => address,
            Err(e) => {
                self.return_trial_permit(trial).await;

                return Err(match e {
                    DirectoryError::NotFound { .. } => AttemptFailure::Permanent(e.to_string()),
                    DirectoryError::Unavailable(_) => AttemptFailure::Transient(e.to_string()),
                });
            }
        };

        let message = match self
            .renderer
            .render(&request.template_code, &request.variables)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                self.return_trial_permit(trial).await;

                return Err(match e {
                    RenderError::InvalidTemplate { .. } => AttemptFailure::Permanent(e.to_string()),
                    RenderError::Unavailable(_) => AttemptFailure::Transient(e.to_string()),
                });
            }
        };

        let sent = tokio::time::timeout(self.provider_timeout, self.transport.send(&address, &message))
            .await;

        match sent {
            Ok(Ok(())) => {
                self.record_breaker(true).await;
                Ok(())
            }
            Ok(Err(SendError::Permanent(reason))) => {
                // The provider answered, so the circuit stays healthy even
                // though this notification is unsendable.
                self.record_breaker(true).await;
                Err(AttemptFailure::Permanent(reason))
            }
            Ok(Err(SendError::Transient(reason))) => {
                self.record_breaker(false).await;
                Err(AttemptFailure::Transient(reason))
            }
            Err(_) => {
                self.record_breaker(false).await;
                Err(AttemptFailure::Transient(format!(
                    "provider send timed out after {:?}",
                    self.provider_timeout
                )))
            }
        }
    }

    async fn record_breaker(&self, success: bool) {
        let result = if success {
            self.breaker.record_success().await
        } else {
            self.breaker.record_failure().await
        };

        if let Err(e) = result {
            warn!(
                provider = self.transport.name(),
                error = %e,
                "Failed to record circuit breaker outcome"
            );
        }
    }

    async fn return_trial_permit(&self, trial: bool) {
        if !trial {
            return;
        }

        if let Err(e) = self.breaker.abort_trial().await {
            warn!(
                provider = self.transport.name(),
                error = %e,
                "Failed to return circuit breaker trial permit"
            );
        }
    }

    async fn dead_letter(
        &self,
        envelope: NotificationEnvelope,
        attempt: u32,
        reason: String,
    ) -> Result<ProcessOutcome, ProcessError> {
        let notification_id = envelope.notification_id;

        let mut terminal = envelope;
        terminal.attempt_count = attempt;

        let message = DeadLetterMessage::new(terminal, reason.clone());

        self.broker.publish_dead_letter(&message).await?;

        self.statuses
            .mark(
                notification_id,
                DeliveryState::DeadLettered,
                Some(&reason),
                attempt,
            )
            .await?;

        warn!(
            notification_id = %notification_id,
            correlation_id = %message.envelope.request.correlation_id,
            attempt,
            error = %reason,
            "Notification dead-lettered"
        );

        Ok(ProcessOutcome::DeadLettered { reason })
    }
}

/// Consume a channel's RabbitMQ queue with one worker instance until the
/// consumer stream ends. Terminal dispositions ack; infrastructure errors
/// nack with requeue so another instance can pick the envelope up.
pub async fn run_rabbitmq_worker(
    worker: Arc<ChannelWorker>,
    rabbit: Arc<RabbitMqBroker>,
    consumer_tag: String,
) -> Result<(), Error> {
    let mut consumer = rabbit.create_consumer(worker.channel(), &consumer_tag).await?;

    info!(channel = %worker.channel(), consumer_tag, "Worker consuming");

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(error = %e, "Consumer delivery error");
                continue;
            }
        };

        let delivery_tag = delivery.delivery_tag;

        let envelope = match serde_json::from_slice::<NotificationEnvelope>(&delivery.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Discarding malformed envelope");
                rabbit.reject(delivery_tag, false).await?;
                continue;
            }
        };

        match worker.process(envelope).await {
            Ok(_) => rabbit.acknowledge(delivery_tag).await?,
            Err(e) => {
                warn!(error = %e, "Processing failed, requeueing for redelivery");
                rabbit.reject(delivery_tag, true).await?;
            }
        }
    }

    Ok(())
}
