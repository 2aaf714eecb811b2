use std::sync::Arc;

use anyhow::{Error, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dispatch_service::admission::AdmissionGateway;
use dispatch_service::api::{AppState, run_api_server};
use dispatch_service::broker::Broker;
use dispatch_service::clients::circuit_breaker::CircuitBreaker;
use dispatch_service::clients::email_gateway::EmailGatewayClient;
use dispatch_service::clients::health::HealthChecker;
use dispatch_service::clients::postgres::PostgresStatusStore;
use dispatch_service::clients::push_gateway::PushGatewayClient;
use dispatch_service::clients::rbmq::RabbitMqBroker;
use dispatch_service::clients::redis::RedisKvStore;
use dispatch_service::clients::template::TemplateServiceClient;
use dispatch_service::clients::users::UserServiceClient;
use dispatch_service::config::Config;
use dispatch_service::models::request::Channel;
use dispatch_service::providers::{ProviderTransport, TemplateRenderer, UserDirectory};
use dispatch_service::store::{IdempotencyStore, KvStore, RateLimiter, StatusStore};
use dispatch_service::worker::{ChannelWorker, run_rabbitmq_worker};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting dispatch service");

    let kv_store: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(&config.redis_url).await?);

    let postgres = PostgresStatusStore::connect(&config.database_url).await?;
    postgres.ensure_schema().await?;
    let statuses: Arc<dyn StatusStore> = Arc::new(postgres);

    let rabbit = Arc::new(RabbitMqBroker::connect(&config).await?);
    let broker: Arc<dyn Broker> = rabbit.clone();

    let directory: Arc<dyn UserDirectory> = Arc::new(UserServiceClient::new(
        config.user_service_url.clone(),
        config.provider_timeout(),
    )?);

    let renderer: Arc<dyn TemplateRenderer> = Arc::new(TemplateServiceClient::new(
        config.template_service_url.clone(),
        config.provider_timeout(),
    )?);

    let email_transport: Arc<dyn ProviderTransport> = Arc::new(EmailGatewayClient::new(
        config.email_gateway_url.clone(),
        config.email_gateway_api_key.clone(),
        config.email_from_address.clone(),
        config.provider_timeout(),
    )?);

    let push_transport: Arc<dyn ProviderTransport> = Arc::new(PushGatewayClient::new(
        config.push_gateway_url.clone(),
        config.push_gateway_api_key.clone(),
        config.provider_timeout(),
    )?);

    let gateway = AdmissionGateway::new(
        broker.clone(),
        statuses.clone(),
        IdempotencyStore::new(kv_store.clone(), config.idempotency_ttl()),
        RateLimiter::new(kv_store.clone(), config.rate_limit_config()),
    );

    let mut breakers = Vec::new();

    for (channel, transport) in [
        (Channel::Email, email_transport),
        (Channel::Push, push_transport),
    ] {
        let breaker = CircuitBreaker::new(
            transport.name().to_string(),
            kv_store.clone(),
            config.circuit_breaker_config(),
        );
        breakers.push(breaker.clone());

        let worker = Arc::new(ChannelWorker::new(
            channel,
            broker.clone(),
            statuses.clone(),
            directory.clone(),
            renderer.clone(),
            transport,
            breaker,
            config.retry_config(),
            config.provider_timeout(),
        ));

        for instance in 0..config.worker_concurrency {
            let worker = worker.clone();
            let rabbit = rabbit.clone();
            let tag = format!("{}_worker_{}", channel, instance);

            tokio::spawn(async move {
                if let Err(e) = run_rabbitmq_worker(worker, rabbit, tag).await {
                    tracing::error!(error = %e, "Worker loop terminated");
                }
            });
        }
    }

    let state = Arc::new(AppState {
        gateway,
        statuses: statuses.clone(),
        health_checker: HealthChecker::new(kv_store, statuses, broker, breakers),
    });

    run_api_server(state, config.server_port).await
}
