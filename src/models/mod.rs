pub mod circuit_breaker;
pub mod envelope;
pub mod health;
pub mod rate_limit;
pub mod request;
pub mod response;
pub mod retry;
pub mod status;
