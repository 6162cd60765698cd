use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use kolbot::models::{Subscription, SubscriptionType, WatchConfig};
use kolbot::provider::{ProviderError, WebhookProvider};
use kolbot::store::{Keyspace, Kv, MemoryKv};

/// Production keyspace: no prefix noise in assertions.
#[allow(dead_code)]
pub fn test_keyspace() -> Keyspace {
    Keyspace::new("production")
}

#[allow(dead_code)]
pub fn test_kv() -> Arc<MemoryKv> {
    Arc::new(MemoryKv::new())
}

/// Provider double that records every watch-list edit.
#[derive(Default)]
pub struct RecordingProvider {
    appended: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    watched: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingProvider {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub async fn set_watched(&self, addresses: Vec<String>) {
        *self.watched.lock().await = addresses;
    }

    #[allow(dead_code)]
    pub async fn appended(&self) -> Vec<String> {
        self.appended.lock().await.clone()
    }

    #[allow(dead_code)]
    pub async fn removed(&self) -> Vec<String> {
        self.removed.lock().await.clone()
    }

    fn check_fail(&self) -> Result<(), ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::WebhookNotFound("forced-failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookProvider for RecordingProvider {
    async fn append_addresses(&self, addresses: &[String]) -> Result<(), ProviderError> {
        self.check_fail()?;
        let mut appended = self.appended.lock().await;
        appended.extend(addresses.iter().cloned());
        let mut watched = self.watched.lock().await;
        for address in addresses {
            if !watched.contains(address) {
                watched.push(address.clone());
            }
        }
        Ok(())
    }

    async fn remove_addresses(&self, addresses: &[String]) -> Result<(), ProviderError> {
        self.check_fail()?;
        let mut removed = self.removed.lock().await;
        removed.extend(addresses.iter().cloned());
        self.watched.lock().await.retain(|a| !addresses.contains(a));
        Ok(())
    }

    async fn watched_addresses(&self) -> Result<Vec<String>, ProviderError> {
        self.check_fail()?;
        Ok(self.watched.lock().await.clone())
    }
}

/// Store double whose every operation fails, for fail-open/fail-closed
/// checks.
#[allow(dead_code)]
pub struct FailingKv;

#[async_trait]
impl Kv for FailingKv {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
        anyhow::bail!("kv down")
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> anyhow::Result<()> {
        anyhow::bail!("kv down")
    }
    async fn del(&self, _keys: &[&str]) -> anyhow::Result<u64> {
        anyhow::bail!("kv down")
    }
    async fn sadd(&self, _key: &str, _member: &str, _ttl: Option<Duration>) -> anyhow::Result<u64> {
        anyhow::bail!("kv down")
    }
    async fn srem(&self, _key: &str, _member: &str) -> anyhow::Result<u64> {
        anyhow::bail!("kv down")
    }
    async fn smembers(&self, _key: &str) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("kv down")
    }
    async fn scard(&self, _key: &str) -> anyhow::Result<u64> {
        anyhow::bail!("kv down")
    }
    async fn zadd(&self, _key: &str, _score: f64, _member: &str, _ttl: Option<Duration>) -> anyhow::Result<()> {
        anyhow::bail!("kv down")
    }
    async fn zrevrange(&self, _key: &str, _start: isize, _stop: isize) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("kv down")
    }
    async fn zremrangebyrank(&self, _key: &str, _start: isize, _stop: isize) -> anyhow::Result<u64> {
        anyhow::bail!("kv down")
    }
    async fn incr(&self, _key: &str, _ttl: Option<Duration>) -> anyhow::Result<i64> {
        anyhow::bail!("kv down")
    }
    async fn decr(&self, _key: &str) -> anyhow::Result<i64> {
        anyhow::bail!("kv down")
    }
    async fn ping(&self) -> anyhow::Result<()> {
        anyhow::bail!("kv down")
    }
}

/// Build a subscription request the way clients send them (no id or
/// timestamps worth keeping — the registry assigns those).
#[allow(dead_code)]
pub fn make_subscription(user_id: &str, kol_wallet: &str, kind: SubscriptionType) -> Subscription {
    Subscription {
        id: Uuid::nil(),
        user_id: user_id.into(),
        kol_wallet: kol_wallet.into(),
        wallet_address: format!("addr-{user_id}"),
        private_key: format!("key-{user_id}"),
        kind,
        active: true,
        copy_percentage: Decimal::from(50),
        min_amount: Some(Decimal::new(1, 2)),
        max_amount: None,
        token_buy_count: None,
        watch_config: None,
        safety: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Trade-type subscription that must pass the purchase-quota gate.
#[allow(dead_code)]
pub fn make_gated_subscription(user_id: &str, kol_wallet: &str, token_buy_count: u32) -> Subscription {
    let mut sub = make_subscription(user_id, kol_wallet, SubscriptionType::Trade);
    sub.token_buy_count = Some(token_buy_count);
    sub.watch_config = Some(WatchConfig {
        take_profit_pct: Some(Decimal::from(50)),
        stop_loss_pct: Some(Decimal::from(20)),
        trailing_stop_pct: None,
        max_hold_minutes: Some(240),
    });
    sub
}
