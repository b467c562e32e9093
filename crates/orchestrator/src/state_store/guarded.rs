use std::sync::Arc;

use async_trait::async_trait;

use super::{StateStore, StateStoreError};
use crate::circuit_breaker::CircuitBreaker;

/// Wraps a [`StateStore`] so every call trips the state-store circuit breaker
/// on failure and closes it again on success, the same pattern
/// `control_plane.rs` applies around its own HTTP calls. The state store is a
/// hard dependency (SPEC_FULL.md §7): the assignment loop checks
/// `CircuitBreakerRegistry::any_hard_open` before dispatching, so an open
/// breaker here pauses assignment rather than spinning on a dead Redis.
pub struct GuardedStateStore {
    inner: Arc<dyn StateStore>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedStateStore {
    pub fn new(inner: Arc<dyn StateStore>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    fn observe<T>(&self, result: Result<T, StateStoreError>) -> Result<T, StateStoreError> {
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }
}

#[async_trait]
impl StateStore for GuardedStateStore {
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StateStoreError> {
        let result = self.inner.set(key, value, ttl_secs).await;
        self.observe(result)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let result = self.inner.get(key).await;
        self.observe(result)
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        let result = self.inner.delete(key).await;
        self.observe(result)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StateStoreError> {
        let result = self.inner.sadd(key, member).await;
        self.observe(result)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StateStoreError> {
        let result = self.inner.srem(key, member).await;
        self.observe(result)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StateStoreError> {
        let result = self.inner.smembers(key).await;
        self.observe(result)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StateStoreError> {
        let result = self.inner.zadd(key, member, score).await;
        self.observe(result)
    }

    async fn zpopmin(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let result = self.inner.zpopmin(key).await;
        self.observe(result)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StateStoreError> {
        let result = self.inner.zrem(key, member).await;
        self.observe(result)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StateStoreError> {
        let result = self.inner.zcard(key).await;
        self.observe(result)
    }

    async fn health_check(&self) -> Result<(), StateStoreError> {
        let result = self.inner.health_check().await;
        self.observe(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::InMemoryStateStore;

    #[tokio::test]
    async fn success_keeps_breaker_closed() {
        let breaker = Arc::new(CircuitBreaker::new("state_store", 5, 60));
        let store = GuardedStateStore::new(Arc::new(InMemoryStateStore::new()), breaker.clone());
        store.set("k", "v", 60).await.unwrap();
        assert_eq!(breaker.current_state(), crate::circuit_breaker::CircuitState::Closed);
    }
}
