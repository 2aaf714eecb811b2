pub mod circuit_breaker;
pub mod email_gateway;
pub mod health;
pub mod memory;
pub mod postgres;
pub mod push_gateway;
pub mod rbmq;
pub mod redis;
pub mod template;
pub mod users;
