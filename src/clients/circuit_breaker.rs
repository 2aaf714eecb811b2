use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::circuit_breaker::{CircuitBreakerConfig, CircuitDecision, CircuitState};
use crate::store::KvStore;

/// Per-provider failure-rate guard. State lives in the shared key-value
/// store so every worker instance for a provider sees one breaker; the
/// open → half_open transition is a compare-and-swap, so exactly one worker
/// wins the trial call.
///
/// Failure counting is windowed, not strictly consecutive: the counter key
/// expires `recovery_timeout` after the failure that created it, so only
/// failures clustered within that span can trip the breaker. A success
/// deletes the counter outright.
#[derive(Clone)]
pub struct CircuitBreaker {
    provider: String,
    store: Arc<dyn KvStore>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(provider: String, store: Arc<dyn KvStore>, config: CircuitBreakerConfig) -> Self {
        info!(provider = %provider, "Circuit breaker initialized");

        Self {
            provider,
            store,
            config,
        }
    }

    /// Decide whether a provider call may proceed. Never contacts the
    /// provider itself.
    pub async fn acquire(&self) -> Result<CircuitDecision, StoreError> {
        match self.state().await? {
            CircuitState::Closed => Ok(CircuitDecision::Allow { trial: false }),
            CircuitState::HalfOpen => {
                // A trial call is already in flight elsewhere.
                debug!(provider = %self.provider, "Circuit half-open, trial in flight");
                Ok(CircuitDecision::Reject)
            }
            CircuitState::Open => {
                if !self.recovery_elapsed().await? {
                    return Ok(CircuitDecision::Reject);
                }

                let won = self
                    .store
                    .compare_and_swap(
                        &self.state_key(),
                        CircuitState::Open.as_str(),
                        CircuitState::HalfOpen.as_str(),
                    )
                    .await?;

                if won {
                    info!(provider = %self.provider, "Circuit breaker attempting reset");
                    Ok(CircuitDecision::Allow { trial: true })
                } else {
                    Ok(CircuitDecision::Reject)
                }
            }
        }
    }

    pub async fn record_success(&self) -> Result<(), StoreError> {
        let state = self.state().await?;

        self.store
            .set(&self.state_key(), CircuitState::Closed.as_str(), None)
            .await?;
        self.store.delete(&self.failures_key()).await?;
        self.store.delete(&self.opened_at_key()).await?;

        if state == CircuitState::HalfOpen {
            info!(provider = %self.provider, "Circuit breaker closed after successful recovery");
        }

        Ok(())
    }

    pub async fn record_failure(&self) -> Result<(), StoreError> {
        let state = self.state().await?;

        if state == CircuitState::HalfOpen {
            self.open_circuit().await?;
            warn!(provider = %self.provider, "Circuit breaker reopened after failed recovery attempt");
            return Ok(());
        }

        let failures = self
            .store
            .increment(&self.failures_key(), self.config.recovery_timeout)
            .await?;

        debug!(
            provider = %self.provider,
            failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if failures >= self.config.failure_threshold as u64 {
            self.open_circuit().await?;
            warn!(
                provider = %self.provider,
                failures,
                "Circuit breaker opened due to consecutive failures"
            );
        }

        Ok(())
    }

    /// Return an unused half-open trial permit. The breaker goes back to
    /// open with `opened_at` untouched, so the next caller may probe
    /// immediately.
    pub async fn abort_trial(&self) -> Result<(), StoreError> {
        self.store
            .compare_and_swap(
                &self.state_key(),
                CircuitState::HalfOpen.as_str(),
                CircuitState::Open.as_str(),
            )
            .await?;

        Ok(())
    }

    pub async fn state(&self) -> Result<CircuitState, StoreError> {
        let value = self.store.get(&self.state_key()).await?;

        Ok(value
            .map(|s| CircuitState::from_string(&s))
            .unwrap_or(CircuitState::Closed))
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    async fn open_circuit(&self) -> Result<(), StoreError> {
        self.store
            .set(&self.state_key(), CircuitState::Open.as_str(), None)
            .await?;
        self.store
            .set(&self.opened_at_key(), &unix_now().to_string(), None)
            .await?;
        self.store.delete(&self.failures_key()).await?;

        Ok(())
    }

    async fn recovery_elapsed(&self) -> Result<bool, StoreError> {
        let opened_at = self
            .store
            .get(&self.opened_at_key())
            .await?
            .and_then(|v| v.parse::<u64>().ok());

        match opened_at {
            Some(opened_at) => {
                let elapsed = unix_now().saturating_sub(opened_at);
                Ok(elapsed >= self.config.recovery_timeout.as_millis() as u64)
            }
            None => Ok(false),
        }
    }

    fn state_key(&self) -> String {
        format!("circuit:{}:state", self.provider)
    }

    fn failures_key(&self) -> String {
        format!("circuit:{}:failures", self.provider)
    }

    fn opened_at_key(&self) -> String {
        format!("circuit:{}:opened_at", self.provider)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
