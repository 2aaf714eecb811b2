use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2,
        }
    }
}

impl RetryConfig {
    /// Redelivery delay for a failed attempt: `initial * multiplier^(n-1)`,
    /// capped at `max_delay_ms`. Attempt numbers start at 1.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);

        let delay_ms = self
            .backoff_multiplier
            .checked_pow(exponent)
            .and_then(|factor| self.initial_delay_ms.checked_mul(factor))
            .unwrap_or(self.max_delay_ms);

        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}
