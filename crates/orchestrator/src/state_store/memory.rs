use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{StateStore, StateStoreError};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory state store used for tests and local development without infrastructure.
///
/// TTLs are honored lazily: an expired key is treated as absent the next time
/// it is read, matching Redis's own lazy-expiry behavior closely enough for
/// the orchestrator's purposes.
#[derive(Default)]
pub struct InMemoryStateStore {
    strings: Mutex<HashMap<String, Entry>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
    /// Sorted set emulated as score -> insertion-ordered members, so ties break FIFO.
    sorted_sets: Mutex<HashMap<String, BTreeMap<(i64, u64), String>>>,
    seq: std::sync::atomic::AtomicU64,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StateStoreError> {
        let mut strings = self.strings.lock().unwrap();
        strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let mut strings = self.strings.lock().unwrap();
        if let Some(entry) = strings.get(key) {
            if entry.expires_at < Instant::now() {
                strings.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        self.strings.lock().unwrap().remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StateStoreError> {
        self.sets
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StateStoreError> {
        if let Some(set) = self.sets.lock().unwrap().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StateStoreError> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StateStoreError> {
        let seq = self.next_seq();
        let mut sorted_sets = self.sorted_sets.lock().unwrap();
        let zset = sorted_sets.entry(key.to_string()).or_default();
        zset.retain(|_, m| m != member);
        zset.insert((score, seq), member.to_string());
        Ok(())
    }

    async fn zpopmin(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let mut sorted_sets = self.sorted_sets.lock().unwrap();
        if let Some(zset) = sorted_sets.get_mut(key) {
            if let Some((&k, _)) = zset.iter().next() {
                return Ok(zset.remove(&k));
            }
        }
        Ok(None)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StateStoreError> {
        if let Some(zset) = self.sorted_sets.lock().unwrap().get_mut(key) {
            zset.retain(|_, m| m != member);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<u64, StateStoreError> {
        Ok(self
            .sorted_sets
            .lock()
            .unwrap()
            .get(key)
            .map(|z| z.len() as u64)
            .unwrap_or(0))
    }

    async fn health_check(&self) -> Result<(), StateStoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zpopmin_respects_priority_then_fifo() {
        let store = InMemoryStateStore::new();
        store.zadd("q", "a", -0).await.unwrap();
        store.zadd("q", "b", -10).await.unwrap();
        store.zadd("q", "c", -0).await.unwrap();

        assert_eq!(store.zpopmin("q").await.unwrap(), Some("b".into()));
        assert_eq!(store.zpopmin("q").await.unwrap(), Some("a".into()));
        assert_eq!(store.zpopmin("q").await.unwrap(), Some("c".into()));
        assert_eq!(store.zpopmin("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_get_roundtrip() {
        let store = InMemoryStateStore::new();
        store.set("k", "v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".into()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sadd_srem_smembers() {
        let store = InMemoryStateStore::new();
        store.sadd("s", "w1").await.unwrap();
        store.sadd("s", "w2").await.unwrap();
        let mut members = store.smembers("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["w1".to_string(), "w2".to_string()]);

        store.srem("s", "w1").await.unwrap();
        assert_eq!(store.smembers("s").await.unwrap(), vec!["w2".to_string()]);
    }
}
