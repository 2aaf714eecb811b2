//! Storage seams: a conditional-update key-value store shared by the
//! idempotency window, rate windows, and circuit breaker state, plus the
//! delivery status store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::rate_limit::{RateLimitConfig, RateLimitDecision};
use crate::models::status::{DeliveryState, DeliveryStatus};

/// Key-value store with conditional-update primitives. Workers are
/// horizontally scaled, so every mutable counter in the pipeline lives
/// behind this seam rather than in process memory.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Atomic test-and-insert. Returns true when this caller created the key.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Atomic compare-and-swap. Returns true when the swap was applied.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError>;

    /// Atomic increment. `ttl_on_create` bounds the counter's window when the
    /// increment creates the key.
    async fn increment(&self, key: &str, ttl_on_create: Duration) -> Result<u64, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Delivery lifecycle persistence. Writers are exclusively the admission
/// gateway (insert, rollback delete) and the channel worker (transitions).
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn insert(&self, status: &DeliveryStatus) -> Result<(), StoreError>;

    async fn get(&self, notification_id: Uuid) -> Result<Option<DeliveryStatus>, StoreError>;

    async fn mark(
        &self,
        notification_id: Uuid,
        state: DeliveryState,
        last_error: Option<&str>,
        attempt_count: u32,
    ) -> Result<(), StoreError>;

    /// Admission rollback only: removes the row created for a publish that
    /// never reached the broker.
    async fn delete(&self, notification_id: Uuid) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Tracks admitted request identifiers for the dedup window. Duplicates are
/// only detected within the TTL; a documented limitation of the retention
/// period, not a correctness gap.
#[derive(Clone)]
pub struct IdempotencyStore {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(request_id: &str) -> String {
        format!("idempotency:{}", request_id)
    }

    /// Returns the notification_id previously assigned to this request_id.
    pub async fn lookup(&self, request_id: &str) -> Result<Option<Uuid>, StoreError> {
        let value = self.store.get(&Self::key(request_id)).await?;

        Ok(value.and_then(|v| Uuid::parse_str(&v).ok()))
    }

    /// Atomically reserve the request_id for `notification_id`. Returns false
    /// when a concurrent identical request won the race.
    pub async fn reserve(
        &self,
        request_id: &str,
        notification_id: Uuid,
    ) -> Result<bool, StoreError> {
        let created = self
            .store
            .set_if_absent(
                &Self::key(request_id),
                &notification_id.to_string(),
                self.ttl,
            )
            .await?;

        debug!(request_id, %notification_id, created, "Idempotency reservation attempted");

        Ok(created)
    }

    /// Admission rollback: release a reservation whose publish failed.
    pub async fn release(&self, request_id: &str) -> Result<(), StoreError> {
        self.store.delete(&Self::key(request_id)).await
    }
}

/// Sliding per-user admission counter. Increment-then-check: the counter
/// moves first, then the decision falls out of the new count.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    fn key(user_id: &str) -> String {
        format!("rate_limit:user:{}", user_id)
    }

    pub async fn check(&self, user_id: &str) -> Result<RateLimitDecision, StoreError> {
        let count = self
            .store
            .increment(&Self::key(user_id), self.config.window)
            .await?;

        if count > self.config.max_requests {
            debug!(user_id, count, limit = self.config.max_requests, "Rate limit exceeded");

            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
            });
        }

        Ok(RateLimitDecision {
            allowed: true,
            remaining: self.config.max_requests - count,
        })
    }

    /// Current quota without consuming any of it. Used when answering a
    /// duplicate admission, which must not re-count against the window.
    pub async fn remaining(&self, user_id: &str) -> Result<u64, StoreError> {
        let count = self
            .store
            .get(&Self::key(user_id))
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(self.config.max_requests.saturating_sub(count))
    }
}
