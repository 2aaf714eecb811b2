//! In-process backends: a broker, key-value store, and status store backed
//! by plain collections. They power the integration tests and local
//! development runs without RabbitMQ, Redis, or Postgres.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::{BrokerError, StoreError};
use crate::models::envelope::{DeadLetterMessage, NotificationEnvelope};
use crate::models::request::Channel;
use crate::models::status::{DeliveryState, DeliveryStatus};
use crate::store::{KvStore, StatusStore};

#[derive(Default)]
struct MemoryQueue {
    items: Mutex<VecDeque<NotificationEnvelope>>,
    notify: Notify,
}

#[derive(Default)]
struct BrokerInner {
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    dead_letters: Mutex<Vec<DeadLetterMessage>>,
}

/// Broker with one queue per channel and an inspectable dead-letter buffer.
/// Delayed retries run on a tokio timer.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        let mut queues = self.inner.queues.lock().unwrap();

        queues.entry(name.to_string()).or_default().clone()
    }

    /// Take the next envelope, waiting until one is available.
    pub async fn pop(&self, channel: Channel) -> NotificationEnvelope {
        let queue = self.queue(channel.queue_name());

        loop {
            let notified = queue.notify.notified();

            if let Some(envelope) = queue.items.lock().unwrap().pop_front() {
                return envelope;
            }

            notified.await;
        }
    }

    pub fn try_pop(&self, channel: Channel) -> Option<NotificationEnvelope> {
        self.queue(channel.queue_name())
            .items
            .lock()
            .unwrap()
            .pop_front()
    }

    pub fn queue_depth(&self, channel: Channel) -> usize {
        self.queue(channel.queue_name()).items.lock().unwrap().len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterMessage> {
        self.inner.dead_letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(
        &self,
        channel: Channel,
        envelope: &NotificationEnvelope,
    ) -> Result<(), BrokerError> {
        let queue = self.queue(channel.queue_name());

        queue.items.lock().unwrap().push_back(envelope.clone());
        queue.notify.notify_one();

        Ok(())
    }

    async fn publish_retry(
        &self,
        channel: Channel,
        envelope: &NotificationEnvelope,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let broker = self.clone();
        let envelope = envelope.clone();

        debug!(
            notification_id = %envelope.notification_id,
            delay_ms = delay.as_millis() as u64,
            "Scheduling delayed redelivery"
        );

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let queue = broker.queue(channel.queue_name());
            queue.items.lock().unwrap().push_back(envelope);
            queue.notify.notify_one();
        });

        Ok(())
    }

    async fn publish_dead_letter(&self, message: &DeadLetterMessage) -> Result<(), BrokerError> {
        self.inner.dead_letters.lock().unwrap().push(message.clone());

        Ok(())
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Conditional-update key-value store. The single mutex gives the same
/// serialized-update discipline a central Redis provides.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<Mutex<HashMap<String, KvEntry>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().unwrap();

        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();

        entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );

        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap();

        let live = entries.get(key).is_some_and(|entry| !entry.expired());

        if live {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );

        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap();

        match entries.get_mut(key) {
            Some(entry) if !entry.expired() && entry.value == expected => {
                entry.value = value.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment(&self, key: &str, ttl_on_create: Duration) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().unwrap();

        let live = entries.get(key).is_some_and(|entry| !entry.expired());

        if !live {
            entries.insert(
                key.to_string(),
                KvEntry {
                    value: "1".to_string(),
                    expires_at: Some(Instant::now() + ttl_on_create),
                },
            );

            return Ok(1);
        }

        let entry = entries.get_mut(key).unwrap();
        let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
        entry.value = count.to_string();

        Ok(count)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().unwrap().remove(key);

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStatusStore {
    rows: Arc<Mutex<HashMap<Uuid, DeliveryStatus>>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn insert(&self, status: &DeliveryStatus) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap()
            .insert(status.notification_id, status.clone());

        Ok(())
    }

    async fn get(&self, notification_id: Uuid) -> Result<Option<DeliveryStatus>, StoreError> {
        Ok(self.rows.lock().unwrap().get(&notification_id).cloned())
    }

    async fn mark(
        &self,
        notification_id: Uuid,
        state: DeliveryState,
        last_error: Option<&str>,
        attempt_count: u32,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();

        let row = rows
            .get_mut(&notification_id)
            .ok_or_else(|| StoreError::backend(format!("unknown notification {}", notification_id)))?;

        row.state = state;
        row.last_error = last_error.map(|e| e.to_string());
        row.attempt_count = attempt_count;
        row.updated_at = Utc::now();

        Ok(())
    }

    async fn delete(&self, notification_id: Uuid) -> Result<(), StoreError> {
        self.rows.lock().unwrap().remove(&notification_id);

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
