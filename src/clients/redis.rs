use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::MultiplexedConnection};
use tracing::info;

use crate::error::StoreError;
use crate::store::KvStore;

const CAS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#;

/// Redis-backed key-value store. The multiplexed connection is cheap to
/// clone, so each operation works on its own handle.
pub struct RedisKvStore {
    connection: MultiplexedConnection,
    cas_script: Script,
}

impl RedisKvStore {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            cas_script: Script::new(CAS_SCRIPT),
        })
    }

    fn ttl_seconds(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();

        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();

        match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(key, value, Self::ttl_seconds(ttl))
                    .await?
            }
            None => conn.set::<_, _, ()>(key, value).await?,
        }

        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();

        // SET NX EX is the atomic test-and-insert closing the race between
        // two concurrent identical requests.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(Self::ttl_seconds(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();

        let swapped: i64 = self
            .cas_script
            .key(key)
            .arg(expected)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;

        Ok(swapped == 1)
    }

    async fn increment(&self, key: &str, ttl_on_create: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();

        let count: u64 = conn.incr(key, 1).await?;

        if count == 1 {
            conn.expire::<_, ()>(key, Self::ttl_seconds(ttl_on_create) as i64)
                .await?;
        }

        Ok(count)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();

        conn.del::<_, ()>(key).await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;

        Ok(())
    }
}
