pub mod keys;
pub mod memory;
pub mod metrics_repo;
pub mod redis_kv;
pub mod subscription_repo;
pub mod trade_repo;

pub use keys::Keyspace;
pub use memory::MemoryKv;
pub use redis_kv::RedisKv;

use async_trait::async_trait;
use std::time::Duration;

/// The slice of the key-value store contract the broker relies on.
///
/// Implementations must make `incr` atomic (counter bump + TTL refresh in
/// one round trip) — the quota gate's correctness depends on it. All
/// operations carry the implementation's deadline; none may block
/// indefinitely.
#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()>;
    /// Deletes all given keys in one round trip; returns how many existed.
    async fn del(&self, keys: &[&str]) -> anyhow::Result<u64>;

    /// Returns 1 when the member was newly added, 0 when already present.
    async fn sadd(&self, key: &str, member: &str, ttl: Option<Duration>) -> anyhow::Result<u64>;
    async fn srem(&self, key: &str, member: &str) -> anyhow::Result<u64>;
    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>>;
    async fn scard(&self, key: &str) -> anyhow::Result<u64>;

    async fn zadd(&self, key: &str, score: f64, member: &str, ttl: Option<Duration>) -> anyhow::Result<()>;
    /// Members ordered by descending score, `start`/`stop` inclusive ranks
    /// (negative ranks count from the tail).
    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<Vec<String>>;
    /// Removes members by ascending rank; returns how many were removed.
    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<u64>;

    /// Atomic increment + TTL refresh; returns the post-increment value.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> anyhow::Result<i64>;
    async fn decr(&self, key: &str) -> anyhow::Result<i64>;

    async fn ping(&self) -> anyhow::Result<()>;
}
