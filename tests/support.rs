//! Shared fixtures: in-memory stacks plus scripted collaborator fakes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use dispatch_service::admission::AdmissionGateway;
use dispatch_service::broker::Broker;
use dispatch_service::clients::circuit_breaker::CircuitBreaker;
use dispatch_service::clients::memory::{MemoryBroker, MemoryKvStore, MemoryStatusStore};
use dispatch_service::error::{BrokerError, DirectoryError, RenderError, SendError};
use dispatch_service::models::circuit_breaker::CircuitBreakerConfig;
use dispatch_service::models::envelope::{DeadLetterMessage, NotificationEnvelope};
use dispatch_service::models::rate_limit::RateLimitConfig;
use dispatch_service::models::request::{AdmitRequest, Channel, NotificationRequest};
use dispatch_service::models::retry::RetryConfig;
use dispatch_service::models::status::DeliveryStatus;
use dispatch_service::providers::{
    ProviderTransport, RenderedMessage, TemplateRenderer, UserDirectory,
};
use dispatch_service::store::{IdempotencyStore, RateLimiter, StatusStore};
use dispatch_service::worker::ChannelWorker;

pub struct Stack {
    pub broker: MemoryBroker,
    pub kv: Arc<MemoryKvStore>,
    pub statuses: Arc<MemoryStatusStore>,
}

pub fn memory_stack() -> Stack {
    Stack {
        broker: MemoryBroker::new(),
        kv: Arc::new(MemoryKvStore::new()),
        statuses: Arc::new(MemoryStatusStore::new()),
    }
}

pub fn gateway_with(
    stack: &Stack,
    broker: Arc<dyn Broker>,
    max_requests: u64,
    window: Duration,
) -> AdmissionGateway {
    AdmissionGateway::new(
        broker,
        stack.statuses.clone(),
        IdempotencyStore::new(stack.kv.clone(), Duration::from_secs(3_600)),
        RateLimiter::new(
            stack.kv.clone(),
            RateLimitConfig {
                max_requests,
                window,
            },
        ),
    )
}

pub fn gateway(stack: &Stack, max_requests: u64, window: Duration) -> AdmissionGateway {
    gateway_with(stack, Arc::new(stack.broker.clone()), max_requests, window)
}

pub fn admit_request(request_id: &str, user_id: &str, channel: Channel) -> AdmitRequest {
    AdmitRequest {
        request_id: Some(request_id.to_string()),
        user_id: user_id.to_string(),
        channel,
        template_code: "welcome".to_string(),
        variables: HashMap::from([("name".to_string(), "Ada".to_string())]),
        priority: 0,
        correlation_id: None,
    }
}

pub fn envelope_for(channel: Channel) -> NotificationEnvelope {
    let request = NotificationRequest {
        request_id: Uuid::new_v4().to_string(),
        user_id: "u1".to_string(),
        channel,
        template_code: "welcome".to_string(),
        variables: HashMap::from([("name".to_string(), "Ada".to_string())]),
        priority: 0,
        correlation_id: Uuid::new_v4().to_string(),
        created_at: Utc::now(),
    };

    NotificationEnvelope::new(Uuid::new_v4(), request)
}

/// Seed the status row the admission gateway would normally create.
pub async fn seed_status(stack: &Stack, envelope: &NotificationEnvelope) {
    let status = DeliveryStatus::queued(envelope.notification_id, &envelope.request);
    stack.statuses.insert(&status).await.unwrap();
}

pub struct StaticDirectory {
    address: Option<String>,
}

impl StaticDirectory {
    pub fn with_address(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: Some(address.to_string()),
        })
    }

    pub fn unknown_user() -> Arc<Self> {
        Arc::new(Self { address: None })
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn delivery_address(
        &self,
        user_id: &str,
        channel: Channel,
    ) -> Result<String, DirectoryError> {
        match &self.address {
            Some(address) => Ok(address.clone()),
            None => Err(DirectoryError::NotFound {
                user_id: user_id.to_string(),
                channel: channel.to_string(),
            }),
        }
    }
}

pub struct StaticRenderer {
    invalid: bool,
}

impl StaticRenderer {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self { invalid: false })
    }

    pub fn invalid_template() -> Arc<Self> {
        Arc::new(Self { invalid: true })
    }
}

#[async_trait]
impl TemplateRenderer for StaticRenderer {
    async fn render(
        &self,
        template_code: &str,
        variables: &HashMap<String, String>,
    ) -> Result<RenderedMessage, RenderError> {
        if self.invalid {
            return Err(RenderError::InvalidTemplate {
                template_code: template_code.to_string(),
                reason: "unknown template".into(),
            });
        }

        let name = variables.get("name").cloned().unwrap_or_default();

        Ok(RenderedMessage {
            subject: Some("Welcome!".to_string()),
            body: format!("Hello {}", name),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SendScript {
    Succeed,
    Transient,
    Permanent,
}

/// Transport fake that counts calls and follows a per-call script, falling
/// back to the last entry once the script is exhausted.
pub struct ScriptedTransport {
    calls: AtomicU32,
    script: Mutex<Vec<SendScript>>,
}

impl ScriptedTransport {
    pub fn scripted(script: Vec<SendScript>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            script: Mutex::new(script),
        })
    }

    pub fn always_ok() -> Arc<Self> {
        Self::scripted(vec![SendScript::Succeed])
    }

    pub fn always_transient() -> Arc<Self> {
        Self::scripted(vec![SendScript::Transient])
    }

    pub fn always_permanent() -> Arc<Self> {
        Self::scripted(vec![SendScript::Permanent])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "test_provider"
    }

    async fn send(&self, _address: &str, _message: &RenderedMessage) -> Result<(), SendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;

        let script = self.script.lock().unwrap();
        let outcome = script
            .get(call)
            .or_else(|| script.last())
            .copied()
            .unwrap_or(SendScript::Succeed);

        match outcome {
            SendScript::Succeed => Ok(()),
            SendScript::Transient => Err(SendError::Transient("provider overloaded".into())),
            SendScript::Permanent => Err(SendError::Permanent("invalid recipient".into())),
        }
    }
}

/// Transport that never answers within a worker's send timeout.
pub struct StalledTransport {
    calls: AtomicU32,
}

impl StalledTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderTransport for StalledTransport {
    fn name(&self) -> &str {
        "stalled_provider"
    }

    async fn send(&self, _address: &str, _message: &RenderedMessage) -> Result<(), SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

/// Broker wrapper whose publish path can be toggled down, for admission
/// rollback tests.
pub struct FlakyBroker {
    inner: MemoryBroker,
    down: AtomicBool,
}

impl FlakyBroker {
    pub fn new(inner: MemoryBroker) -> Arc<Self> {
        Arc::new(Self {
            inner,
            down: AtomicBool::new(false),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn publish(
        &self,
        channel: Channel,
        envelope: &NotificationEnvelope,
    ) -> Result<(), BrokerError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BrokerError::backend("broker unreachable"));
        }

        self.inner.publish(channel, envelope).await
    }

    async fn publish_retry(
        &self,
        channel: Channel,
        envelope: &NotificationEnvelope,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        self.inner.publish_retry(channel, envelope, delay).await
    }

    async fn publish_dead_letter(&self, message: &DeadLetterMessage) -> Result<(), BrokerError> {
        self.inner.publish_dead_letter(message).await
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        self.inner.ping().await
    }
}

pub struct WorkerOptions {
    pub retry_config: RetryConfig,
    pub breaker_config: CircuitBreakerConfig,
    pub provider_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            retry_config: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 10,
                max_delay_ms: 100,
                backoff_multiplier: 2,
            },
            breaker_config: CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_millis(150),
            },
            provider_timeout: Duration::from_millis(100),
        }
    }
}

pub fn breaker_for(stack: &Stack, transport: &Arc<dyn ProviderTransport>, options: &WorkerOptions) -> CircuitBreaker {
    CircuitBreaker::new(
        transport.name().to_string(),
        stack.kv.clone(),
        options.breaker_config.clone(),
    )
}

pub fn worker_with(
    stack: &Stack,
    directory: Arc<dyn UserDirectory>,
    renderer: Arc<dyn TemplateRenderer>,
    transport: Arc<dyn ProviderTransport>,
    options: WorkerOptions,
) -> ChannelWorker {
    let breaker = breaker_for(stack, &transport, &options);

    ChannelWorker::new(
        Channel::Email,
        Arc::new(stack.broker.clone()),
        stack.statuses.clone(),
        directory,
        renderer,
        transport,
        breaker,
        options.retry_config,
        options.provider_timeout,
    )
}

pub fn default_worker(stack: &Stack, transport: Arc<dyn ProviderTransport>) -> ChannelWorker {
    worker_with(
        stack,
        StaticDirectory::with_address("ada@example.com"),
        StaticRenderer::ok(),
        transport,
        WorkerOptions::default(),
    )
}
