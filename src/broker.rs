//! Broker abstraction: durable, at-least-once transport with per-channel
//! queues, delayed redelivery, and a dead-letter destination.
//!
//! Per-queue FIFO is best-effort only and must not be relied upon for
//! correctness; only request_id uniqueness and the attempt bound are
//! guaranteed by the pipeline.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::models::envelope::{DeadLetterMessage, NotificationEnvelope};
use crate::models::request::Channel;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish an envelope onto the channel's durable queue.
    async fn publish(
        &self,
        channel: Channel,
        envelope: &NotificationEnvelope,
    ) -> Result<(), BrokerError>;

    /// Requeue an envelope for redelivery after `delay`. Implemented as
    /// dead-letter-with-TTL-then-requeue on RabbitMQ and a timer on the
    /// in-process broker, so worker logic stays broker-agnostic.
    async fn publish_retry(
        &self,
        channel: Channel,
        envelope: &NotificationEnvelope,
        delay: Duration,
    ) -> Result<(), BrokerError>;

    /// Route a permanently failed message to the dead-letter destination.
    async fn publish_dead_letter(&self, message: &DeadLetterMessage) -> Result<(), BrokerError>;

    async fn ping(&self) -> Result<(), BrokerError>;
}
