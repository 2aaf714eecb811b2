use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel as AmqpChannel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tracing::{debug, info};

use crate::broker::Broker;
use crate::config::Config;
use crate::error::BrokerError;
use crate::models::envelope::{DeadLetterMessage, NotificationEnvelope};
use crate::models::request::Channel;
use crate::utils::retry_with_backoff;

/// RabbitMQ-backed broker. One durable queue per channel, a shared
/// dead-letter queue, and per-channel retry queues that bounce expired
/// messages back onto the work queue (per-message TTL + DLX).
pub struct RabbitMqBroker {
    connection: Connection,
    channel: AmqpChannel,
    failed_queue_name: String,
}

impl RabbitMqBroker {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let retry_config = config.retry_config();

        let connection = retry_with_backoff(&retry_config, || {
            Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
        })
        .await
        .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        info!("RabbitMQ connection established");

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        let durable = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };

        for queue_channel in [Channel::Email, Channel::Push] {
            channel
                .queue_declare(queue_channel.queue_name(), durable, FieldTable::default())
                .await
                .map_err(|e| anyhow!("Failed to declare work queue: {}", e))?;

            // Expired retry messages dead-letter back onto the work queue.
            let mut retry_args = FieldTable::default();
            retry_args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString("".into()),
            );
            retry_args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(queue_channel.queue_name().into()),
            );

            channel
                .queue_declare(queue_channel.retry_queue_name(), durable, retry_args)
                .await
                .map_err(|e| anyhow!("Failed to declare retry queue: {}", e))?;
        }

        channel
            .queue_declare(&config.failed_queue_name, durable, FieldTable::default())
            .await
            .map_err(|e| anyhow!("Failed to declare dead-letter queue: {}", e))?;

        info!("RabbitMQ queues declared");

        Ok(Self {
            connection,
            channel,
            failed_queue_name: config.failed_queue_name.clone(),
        })
    }

    pub async fn create_consumer(&self, channel: Channel, tag: &str) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                channel.queue_name(),
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(queue = channel.queue_name(), tag, "Consumer created");

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| anyhow!("Failed to reject message: {}", e))?;

        Ok(())
    }
}

#[async_trait]
impl Broker for RabbitMqBroker {
    async fn publish(
        &self,
        channel: Channel,
        envelope: &NotificationEnvelope,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(envelope)?;

        self.channel
            .basic_publish(
                "",
                channel.queue_name(),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?;

        debug!(
            notification_id = %envelope.notification_id,
            queue = channel.queue_name(),
            "Envelope published"
        );

        Ok(())
    }

    async fn publish_retry(
        &self,
        channel: Channel,
        envelope: &NotificationEnvelope,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(envelope)?;
        let expiration = delay.as_millis().to_string();

        self.channel
            .basic_publish(
                "",
                channel.retry_queue_name(),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_expiration(expiration.into()),
            )
            .await?;

        debug!(
            notification_id = %envelope.notification_id,
            queue = channel.retry_queue_name(),
            delay_ms = delay.as_millis() as u64,
            "Envelope parked for delayed redelivery"
        );

        Ok(())
    }

    async fn publish_dead_letter(&self, message: &DeadLetterMessage) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(message)?;

        self.channel
            .basic_publish(
                "",
                &self.failed_queue_name,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        if self.connection.status().connected() {
            Ok(())
        } else {
            Err(BrokerError::backend("RabbitMQ connection lost"))
        }
    }
}
