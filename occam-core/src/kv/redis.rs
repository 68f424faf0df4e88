use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::{info, warn};

use super::KvStore;
use crate::error::Result;

/// Production store backed by a Redis connection manager. Cloning shares the
/// underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    /// Connect to the store, retrying on a fixed interval until it answers.
    /// Only an unparseable address fails immediately.
    pub async fn connect(host: &str, port: u16, retry: Duration) -> Result<Self> {
        let url = format!("redis://{host}:{port}/");
        let client = redis::Client::open(url.as_str())?;

        loop {
            match ConnectionManager::new(client.clone()).await {
                Ok(conn) => {
                    info!("connected to redis at {host}:{port}");
                    return Ok(Self { conn });
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        "redis unreachable at {host}:{port}, retrying in {}s",
                        retry.as_secs()
                    );
                    tokio::time::sleep(retry).await;
                }
            }
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn pop_batch(&self, key: &str, limit: usize) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        // Pipelined range + trim keeps a batch pop to one network round trip.
        let (batch,): (Vec<Vec<u8>>,) = redis::pipe()
            .lrange(key, 0, limit as isize - 1)
            .ltrim(key, limit as isize, -1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(batch)
    }

    async fn zset_trim_by_score(&self, key: &str, max: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.zrembyscore(key, "-inf", max).await?;
        Ok(())
    }

    async fn zset_add(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zset_card(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(key).await?)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.srem(key, member).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
