use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::Kv;

/// Default deadline applied to every store round trip.
const OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Redis-backed store client. `ConnectionManager` multiplexes one
/// connection and reconnects internally; cloning is cheap.
#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
    op_timeout: Duration,
}

impl RedisKv {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid KV url")?;
        let manager = client
            .get_connection_manager()
            .await
            .context("failed to connect to KV store")?;
        Ok(Self {
            manager,
            op_timeout: OP_TIMEOUT,
        })
    }

    async fn deadline<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> anyhow::Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => anyhow::bail!("kv operation exceeded {:?} deadline", self.op_timeout),
        }
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.manager.clone();
        self.deadline(conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => self.deadline(conn.set_ex(key, value, ttl.as_secs())).await,
            None => self.deadline(conn.set(key, value)).await,
        }
    }

    async fn del(&self, keys: &[&str]) -> anyhow::Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        self.deadline(conn.del(keys.to_vec())).await
    }

    async fn sadd(&self, key: &str, member: &str, ttl: Option<Duration>) -> anyhow::Result<u64> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                let (added,): (u64,) = self
                    .deadline(
                        redis::pipe()
                            .atomic()
                            .sadd(key, member)
                            .expire(key, ttl.as_secs() as i64)
                            .ignore()
                            .query_async(&mut conn),
                    )
                    .await?;
                Ok(added)
            }
            None => self.deadline(conn.sadd(key, member)).await,
        }
    }

    async fn srem(&self, key: &str, member: &str) -> anyhow::Result<u64> {
        let mut conn = self.manager.clone();
        self.deadline(conn.srem(key, member)).await
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.manager.clone();
        self.deadline(conn.smembers(key)).await
    }

    async fn scard(&self, key: &str) -> anyhow::Result<u64> {
        let mut conn = self.manager.clone();
        self.deadline(conn.scard(key)).await
    }

    async fn zadd(&self, key: &str, score: f64, member: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                let _: (i64,) = self
                    .deadline(
                        redis::pipe()
                            .atomic()
                            .zadd(key, member, score)
                            .expire(key, ttl.as_secs() as i64)
                            .ignore()
                            .query_async(&mut conn),
                    )
                    .await?;
                Ok(())
            }
            None => self.deadline(conn.zadd(key, member, score)).await,
        }
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<Vec<String>> {
        let mut conn = self.manager.clone();
        self.deadline(conn.zrevrange(key, start, stop)).await
    }

    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<u64> {
        let mut conn = self.manager.clone();
        self.deadline(conn.zremrangebyrank(key, start, stop)).await
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> anyhow::Result<i64> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                let (value,): (i64,) = self
                    .deadline(
                        redis::pipe()
                            .atomic()
                            .incr(key, 1)
                            .expire(key, ttl.as_secs() as i64)
                            .ignore()
                            .query_async(&mut conn),
                    )
                    .await?;
                Ok(value)
            }
            None => self.deadline(conn.incr(key, 1)).await,
        }
    }

    async fn decr(&self, key: &str) -> anyhow::Result<i64> {
        let mut conn = self.manager.clone();
        self.deadline(conn.decr(key, 1)).await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let _: String = self.deadline(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}
