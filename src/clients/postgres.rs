use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::request::Channel;
use crate::models::status::{DeliveryState, DeliveryStatus};
use crate::store::StatusStore;

/// Postgres-backed delivery status store.
pub struct PostgresStatusStore {
    client: Client,
}

impl PostgresStatusStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "Postgres connection task ended");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn ensure_schema(&self) -> Result<(), Error> {
        self.client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS delivery_status (
                    notification_id UUID PRIMARY KEY,
                    request_id      TEXT NOT NULL,
                    user_id         TEXT NOT NULL,
                    channel         TEXT NOT NULL,
                    state           TEXT NOT NULL,
                    last_error      TEXT,
                    attempt_count   INTEGER NOT NULL DEFAULT 0,
                    correlation_id  TEXT NOT NULL,
                    created_at      TIMESTAMPTZ NOT NULL,
                    updated_at      TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS delivery_status_request_id_idx
                    ON delivery_status (request_id);
                "#,
            )
            .await
            .map_err(|e| anyhow!("Failed to ensure delivery_status schema: {}", e))?;

        Ok(())
    }

    fn row_to_status(row: &Row) -> Result<DeliveryStatus, StoreError> {
        let channel: String = row.get("channel");
        let state: String = row.get("state");
        let attempt_count: i32 = row.get("attempt_count");
        let created_at: DateTime<Utc> = row.get("created_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");

        Ok(DeliveryStatus {
            notification_id: row.get("notification_id"),
            request_id: row.get("request_id"),
            user_id: row.get("user_id"),
            channel: Channel::from_string(&channel)
                .ok_or_else(|| StoreError::backend(format!("unknown channel '{}'", channel)))?,
            state: DeliveryState::from_string(&state)
                .ok_or_else(|| StoreError::backend(format!("unknown state '{}'", state)))?,
            last_error: row.get("last_error"),
            attempt_count: attempt_count as u32,
            correlation_id: row.get("correlation_id"),
            created_at,
            updated_at,
        })
    }
}

#[async_trait]
impl StatusStore for PostgresStatusStore {
    async fn insert(&self, status: &DeliveryStatus) -> Result<(), StoreError> {
        self.client
            .execute(
                r#"
                INSERT INTO delivery_status (
                    notification_id, request_id, user_id, channel, state,
                    last_error, attempt_count, correlation_id, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
                &[
                    &status.notification_id,
                    &status.request_id,
                    &status.user_id,
                    &status.channel.as_str(),
                    &status.state.as_str(),
                    &status.last_error,
                    &(status.attempt_count as i32),
                    &status.correlation_id,
                    &status.created_at,
                    &status.updated_at,
                ],
            )
            .await?;

        Ok(())
    }

    async fn get(&self, notification_id: Uuid) -> Result<Option<DeliveryStatus>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM delivery_status WHERE notification_id = $1",
                &[&notification_id],
            )
            .await?;

        row.as_ref().map(Self::row_to_status).transpose()
    }

    async fn mark(
        &self,
        notification_id: Uuid,
        state: DeliveryState,
        last_error: Option<&str>,
        attempt_count: u32,
    ) -> Result<(), StoreError> {
        let updated = self
            .client
            .execute(
                r#"
                UPDATE delivery_status
                SET state = $2, last_error = $3, attempt_count = $4, updated_at = NOW()
                WHERE notification_id = $1
                "#,
                &[
                    &notification_id,
                    &state.as_str(),
                    &last_error,
                    &(attempt_count as i32),
                ],
            )
            .await?;

        if updated == 0 {
            return Err(StoreError::backend(format!(
                "unknown notification {}",
                notification_id
            )));
        }

        Ok(())
    }

    async fn delete(&self, notification_id: Uuid) -> Result<(), StoreError> {
        self.client
            .execute(
                "DELETE FROM delivery_status WHERE notification_id = $1",
                &[&notification_id],
            )
            .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client.query_one("SELECT 1", &[]).await?;

        Ok(())
    }
}
