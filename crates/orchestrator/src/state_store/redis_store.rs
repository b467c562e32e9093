use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{StateStore, StateStoreError};

/// Production state store backed by Redis sorted sets, sets and TTL'd strings.
pub struct RedisStateStore {
    conn: MultiplexedConnection,
}

impl RedisStateStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StateStoreError> {
        tracing::info!("Connecting to Redis state store");

        let client = redis::Client::open(redis_url)
            .map_err(|e| StateStoreError::Connection(e.to_string()))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StateStoreError::Connection(e.to_string()))?;

        let store = Self { conn };
        store.health_check().await?;
        tracing::info!("Redis state store connection established");

        Ok(store)
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(e.to_string()))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(e.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(e.to_string()))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StateStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(e.to_string()))
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(e.to_string()))
    }

    async fn zpopmin(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let mut conn = self.conn.clone();
        // ZPOPMIN returns [member, score] or an empty array.
        let result: Vec<String> = redis::cmd("ZPOPMIN")
            .arg(key)
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(e.to_string()))?;

        Ok(result.into_iter().next())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(e.to_string()))
    }

    async fn zcard(&self, key: &str) -> Result<u64, StateStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(e.to_string()))
    }

    async fn health_check(&self) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(e.to_string()))?;

        if pong != "PONG" {
            return Err(StateStoreError::Command(format!(
                "unexpected PING response: {}",
                pong
            )));
        }
        Ok(())
    }
}
