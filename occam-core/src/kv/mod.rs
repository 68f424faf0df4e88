//! Thin adapter over the external key/value store.
//!
//! The runtime touches the store through the [`KvStore`] trait so that the
//! suppression layer, the rate registry and the ingress poller can be
//! exercised against [`MemoryStore`] without a live server. [`RedisStore`]
//! is the production implementation.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Operation surface the runtime needs from the shared store: batch pops
/// from a list, sorted-set windows, a set, and TTL'd strings.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Pop up to `limit` entries from the head of a list in a single round
    /// trip (range + destructive trim, pipelined). Not transactional: a
    /// crash between the store-side trim and the caller taking ownership
    /// loses at most one batch.
    async fn pop_batch(&self, key: &str, limit: usize) -> Result<Vec<Vec<u8>>>;

    /// Remove all sorted-set members with score less than or equal to `max`.
    async fn zset_trim_by_score(&self, key: &str, max: f64) -> Result<()>;

    async fn zset_add(&self, key: &str, score: f64, member: &str) -> Result<()>;

    async fn zset_card(&self, key: &str) -> Result<u64>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    /// Block until the store answers a ping, retrying on a fixed interval.
    async fn wait_ready(&self, retry: Duration) {
        loop {
            match self.ping().await {
                Ok(()) => break,
                Err(err) => {
                    warn!(
                        error = %err,
                        "key/value store unreachable, retrying in {}s",
                        retry.as_secs()
                    );
                    tokio::time::sleep(retry).await;
                }
            }
        }
    }
}
