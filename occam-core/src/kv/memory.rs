use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::KvStore;
use crate::error::Result;

/// In-memory store used by the test suite and for development without a
/// Redis server. Semantics mirror [`super::RedisStore`] for the operations
/// the runtime uses; string TTLs expire lazily on read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    sets: HashMap<String, HashSet<String>>,
    strings: HashMap<String, (String, Option<Instant>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to a list, as the external producer would.
    pub fn push_message(&self, key: &str, value: impl Into<Vec<u8>>) {
        let mut inner = self.inner.lock();
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.into());
    }

    pub fn list_len(&self, key: &str) -> usize {
        let inner = self.inner.lock();
        inner.lists.get(key).map(VecDeque::len).unwrap_or(0)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn pop_batch(&self, key: &str, limit: usize) -> Result<Vec<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let Some(list) = inner.lists.get_mut(key) else {
            return Ok(Vec::new());
        };
        let take = limit.min(list.len());
        Ok(list.drain(..take).collect())
    }

    async fn zset_trim_by_score(&self, key: &str, max: f64) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(zset) = inner.zsets.get_mut(key) {
            zset.retain(|_, score| *score > max);
        }
        Ok(())
    }

    async fn zset_add(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zset_card(&self, key: &str) -> Result<u64> {
        let inner = self.inner.lock();
        Ok(inner.zsets.get(key).map(HashMap::len).unwrap_or(0) as u64)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(set) = inner.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        match inner.strings.get(key) {
            Some((_, Some(expires))) if *expires <= Instant::now() => {
                inner.strings.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let expires = Instant::now() + std::time::Duration::from_secs(ttl_secs);
        inner
            .strings
            .insert(key.to_string(), (value.to_string(), Some(expires)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.strings.remove(key);
        inner.zsets.remove(key);
        inner.sets.remove(key);
        inner.lists.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
