use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Kv;

#[derive(Default)]
struct Inner {
    strings: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
    // Kept sorted ascending by (score, member).
    zsets: HashMap<String, Vec<(f64, String)>>,
    expiry: HashMap<String, Instant>,
}

impl Inner {
    fn purge(&mut self, key: &str) {
        let expired = self
            .expiry
            .get(key)
            .is_some_and(|deadline| Instant::now() >= *deadline);
        if expired {
            self.expiry.remove(key);
            self.strings.remove(key);
            self.sets.remove(key);
            self.zsets.remove(key);
        }
    }

    fn touch_ttl(&mut self, key: &str, ttl: Option<Duration>) {
        if let Some(ttl) = ttl {
            self.expiry.insert(key.to_string(), Instant::now() + ttl);
        }
    }
}

/// In-process store with the same contract as [`super::RedisKv`]. Single
/// mutex, so every operation is atomic; used by the test suite and by
/// local runs without a KV server.
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<Inner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

fn resolve_rank(index: isize, len: usize) -> isize {
    if index < 0 {
        index + len as isize
    } else {
        index
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        inner.purge(key);
        Ok(inner.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.strings.insert(key.to_string(), value.to_string());
        inner.expiry.remove(key);
        inner.touch_ttl(key, ttl);
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut removed = 0;
        for key in keys {
            inner.purge(key);
            let existed = inner.strings.remove(*key).is_some()
                | inner.sets.remove(*key).is_some()
                | inner.zsets.remove(*key).is_some();
            inner.expiry.remove(*key);
            if existed {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn sadd(&self, key: &str, member: &str, ttl: Option<Duration>) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.purge(key);
        let added = inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        inner.touch_ttl(key, ttl);
        Ok(added as u64)
    }

    async fn srem(&self, key: &str, member: &str) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.purge(key);
        let Some(set) = inner.sets.get_mut(key) else {
            return Ok(0);
        };
        let removed = set.remove(member);
        if set.is_empty() {
            inner.sets.remove(key);
            inner.expiry.remove(key);
        }
        Ok(removed as u64)
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        inner.purge(key);
        Ok(inner
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.purge(key);
        Ok(inner.sets.get(key).map(|set| set.len() as u64).unwrap_or(0))
    }

    async fn zadd(&self, key: &str, score: f64, member: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.purge(key);
        let zset = inner.zsets.entry(key.to_string()).or_default();
        zset.retain(|(_, m)| m != member);
        zset.push((score, member.to_string()));
        zset.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        inner.touch_ttl(key, ttl);
        Ok(())
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        inner.purge(key);
        let Some(zset) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let len = zset.len();
        let start = resolve_rank(start, len).max(0) as usize;
        let stop = resolve_rank(stop, len);
        if stop < 0 || start >= len {
            return Ok(Vec::new());
        }
        let stop = (stop as usize).min(len - 1);
        Ok(zset
            .iter()
            .rev()
            .skip(start)
            .take(stop + 1 - start)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.purge(key);
        let Some(zset) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let len = zset.len();
        let start = resolve_rank(start, len).max(0) as usize;
        let stop = resolve_rank(stop, len);
        if stop < 0 || start >= len {
            return Ok(0);
        }
        let stop = (stop as usize).min(len - 1);
        let removed = (stop + 1 - start) as u64;
        zset.drain(start..=stop);
        if zset.is_empty() {
            inner.zsets.remove(key);
            inner.expiry.remove(key);
        }
        Ok(removed)
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> anyhow::Result<i64> {
        let mut inner = self.inner.lock().await;
        inner.purge(key);
        let current: i64 = inner
            .strings
            .get(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        inner.strings.insert(key.to_string(), next.to_string());
        inner.touch_ttl(key, ttl);
        Ok(next)
    }

    async fn decr(&self, key: &str) -> anyhow::Result<i64> {
        let mut inner = self.inner.lock().await;
        inner.purge(key);
        let current: i64 = inner
            .strings
            .get(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let next = current - 1;
        inner.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
