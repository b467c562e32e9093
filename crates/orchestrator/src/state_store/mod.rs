mod guarded;
mod memory;
mod redis_store;

pub use guarded::GuardedStateStore;
pub use memory::InMemoryStateStore;
pub use redis_store::RedisStateStore;

use async_trait::async_trait;

/// Narrow TTL'd key-value / sorted-set interface the orchestrator uses for all
/// cross-restart state. Any store offering these seven primitives suffices;
/// absence of real persistence behind [`InMemoryStateStore`] is acceptable for
/// tests and local development, at the cost of losing in-flight tasks on restart.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StateStoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StateStoreError>;
    async fn delete(&self, key: &str) -> Result<(), StateStoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StateStoreError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), StateStoreError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StateStoreError>;

    /// Insert or update `member` at `score`. Scores are `-priority` so `zpopmin`
    /// surfaces the highest-priority task first.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StateStoreError>;
    async fn zpopmin(&self, key: &str) -> Result<Option<String>, StateStoreError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<(), StateStoreError>;
    async fn zcard(&self, key: &str) -> Result<u64, StateStoreError>;

    /// Liveness check; used at startup to fail loudly if the store is unreachable.
    async fn health_check(&self) -> Result<(), StateStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("state store connection error: {0}")]
    Connection(String),
    #[error("state store command error: {0}")]
    Command(String),
}

impl From<StateStoreError> for orchestrator_common::OrchestratorError {
    fn from(e: StateStoreError) -> Self {
        orchestrator_common::OrchestratorError::StateStore(e.to_string())
    }
}
