use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::warn;

use crate::broker::Broker;
use crate::clients::circuit_breaker::CircuitBreaker;
use crate::models::circuit_breaker::CircuitState;
use crate::models::health::{HealthCheckResponse, HealthStatus, ServiceHealth};
use crate::store::{KvStore, StatusStore};

pub struct HealthChecker {
    kv_store: Arc<dyn KvStore>,
    status_store: Arc<dyn StatusStore>,
    broker: Arc<dyn Broker>,
    breakers: Vec<CircuitBreaker>,
}

impl HealthChecker {
    pub fn new(
        kv_store: Arc<dyn KvStore>,
        status_store: Arc<dyn StatusStore>,
        broker: Arc<dyn Broker>,
        breakers: Vec<CircuitBreaker>,
    ) -> Self {
        Self {
            kv_store,
            status_store,
            broker,
            breakers,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("cache_store".to_string(), self.check_kv_store().await);
        checks.insert("status_store".to_string(), self.check_status_store().await);
        checks.insert("message_broker".to_string(), self.check_broker().await);

        for breaker in &self.breakers {
            checks.insert(
                breaker.provider().to_string(),
                self.check_breaker(breaker).await,
            );
        }

        let status = Self::overall_status(&checks);

        HealthCheckResponse {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_kv_store(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.kv_store.ping().await {
            Ok(_) => ServiceHealth::healthy(start.elapsed().as_millis() as u64),
            Err(e) => {
                warn!(error = %e, "Cache store health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    async fn check_status_store(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.status_store.ping().await {
            Ok(_) => ServiceHealth::healthy(start.elapsed().as_millis() as u64),
            Err(e) => {
                warn!(error = %e, "Status store health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    async fn check_broker(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.broker.ping().await {
            Ok(_) => ServiceHealth::healthy(start.elapsed().as_millis() as u64),
            Err(e) => {
                warn!(error = %e, "Broker health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    async fn check_breaker(&self, breaker: &CircuitBreaker) -> ServiceHealth {
        match breaker.state().await {
            Ok(CircuitState::Closed) => {
                ServiceHealth::healthy(0).with_circuit_breaker(CircuitState::Closed.as_str().into())
            }
            Ok(state) => ServiceHealth::degraded_circuit_open(state.as_str().into()),
            Err(e) => ServiceHealth::unhealthy(e.to_string()),
        }
    }

    fn overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        if checks
            .values()
            .any(|c| c.status == HealthStatus::Unhealthy)
        {
            return HealthStatus::Unhealthy;
        }

        if checks.values().any(|c| c.status == HealthStatus::Degraded) {
            return HealthStatus::Degraded;
        }

        HealthStatus::Healthy
    }
}
