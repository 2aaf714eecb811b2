//! Error taxonomy for the dispatch pipeline.
//!
//! Admission-time errors surface synchronously to the caller; worker-time
//! errors are recorded in the delivery status and only visible through the
//! status query surface.

use thiserror::Error;

/// Synchronous admission failures.
#[derive(Error, Debug)]
pub enum AdmitError {
    /// Malformed or missing fields. Rejected, not retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Admission throttled; the client may retry after the window elapses.
    #[error("rate limit exceeded for user {user_id}; remaining quota {remaining}")]
    RateLimited { user_id: String, remaining: u64 },

    /// Broker or store unreachable at admission. No side effect is left
    /// behind, so the client may safely retry with the same request_id.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Provider send outcomes, as classified by the transport adapters.
#[derive(Error, Debug)]
pub enum SendError {
    /// Retried with backoff up to the configured attempt bound.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Skips retry and goes straight to the dead-letter queue.
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

/// Delivery-address lookup failures.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// No address for this user and channel. Treated as permanent.
    #[error("no delivery address for user {user_id} on channel {channel}")]
    NotFound { user_id: String, channel: String },

    #[error("directory lookup failed: {0}")]
    Unavailable(String),
}

/// Template fetch/render failures.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Unknown template or unsatisfiable variables. Treated as permanent.
    #[error("invalid template {template_code}: {reason}")]
    InvalidTemplate {
        template_code: String,
        reason: String,
    },

    #[error("template service unavailable: {0}")]
    Unavailable(String),
}

/// Key-value / status store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store operation failed: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Broker publish/consume failures.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("broker operation failed: {0}")]
    Backend(String),

    #[error("failed to encode message: {0}")]
    Codec(#[from] serde_json::Error),
}

impl BrokerError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(e: lapin::Error) -> Self {
        BrokerError::Backend(e.to_string())
    }
}
