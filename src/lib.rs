//! Multi-channel notification dispatch pipeline: admission control
//! (idempotency + rate limiting), durable queue routing, per-channel
//! workers with retry/backoff and circuit breaking, and delivery status
//! tracking.

pub mod admission;
pub mod api;
pub mod broker;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod store;
pub mod utils;
pub mod worker;
