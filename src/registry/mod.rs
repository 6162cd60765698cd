use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::Subscription;
use crate::provider::WebhookProvider;
use crate::store::{subscription_repo, Keyspace, Kv};
use crate::sync::StripedLock;

const USER_LOCK_STRIPES: usize = 64;

/// Authoritative mapping of users → subscriptions and KOL → subscribers.
///
/// The KV store is the source of truth; there is no in-memory cache.
/// Mutations on the same user serialize on a striped lock, and every
/// change to the KOL fan-out sets or the provider's watch list runs under
/// the single registry lock, so the active-set invariant (a wallet is
/// active iff it has subscribers) holds at every lock release.
pub struct KolRegistry {
    kv: Arc<dyn Kv>,
    provider: Arc<dyn WebhookProvider>,
    keys: Keyspace,
    ttl: Option<Duration>,
    user_locks: StripedLock,
    registry_lock: Mutex<()>,
}

impl KolRegistry {
    pub fn new(
        kv: Arc<dyn Kv>,
        provider: Arc<dyn WebhookProvider>,
        keys: Keyspace,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            kv,
            provider,
            keys,
            ttl,
            user_locks: StripedLock::new(USER_LOCK_STRIPES),
            registry_lock: Mutex::new(()),
        }
    }

    /// All subscriptions of one user. Never fails: store trouble reads as
    /// an empty list.
    pub async fn get_user_subscriptions(&self, user_id: &str) -> Vec<Subscription> {
        match subscription_repo::load_user_subscriptions(self.kv.as_ref(), &self.keys, user_id).await
        {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Subscription read failed — returning empty");
                Vec::new()
            }
        }
    }

    /// Upsert by (user, KOL wallet). A matching subscription is replaced
    /// in place, keeping its id and creation time; a new one gets fresh
    /// id + timestamps. Returns the user's full list post-mutation.
    ///
    /// Provider registration is best-effort: a failure is logged and left
    /// for the next `sync_with_provider` to reconcile, the subscription
    /// itself is not rolled back.
    pub async fn add_subscription(&self, mut sub: Subscription) -> anyhow::Result<Vec<Subscription>> {
        let _user_guard = self.user_locks.lock(&sub.user_id).await;

        let now = Utc::now();
        let mut subs =
            subscription_repo::load_user_subscriptions(self.kv.as_ref(), &self.keys, &sub.user_id)
                .await?;

        match subs
            .iter_mut()
            .find(|existing| existing.kol_wallet == sub.kol_wallet)
        {
            Some(existing) => {
                sub.id = existing.id;
                sub.created_at = existing.created_at;
                sub.updated_at = now;
                *existing = sub.clone();
            }
            None => {
                sub.id = Uuid::new_v4();
                sub.created_at = now;
                sub.updated_at = now;
                subs.push(sub.clone());
            }
        }

        subscription_repo::save_user_subscriptions(
            self.kv.as_ref(),
            &self.keys,
            &sub.user_id,
            &subs,
            self.ttl,
        )
        .await?;

        let _registry_guard = self.registry_lock.lock().await;
        let newly_active = subscription_repo::add_subscriber(
            self.kv.as_ref(),
            &self.keys,
            &sub.kol_wallet,
            &sub.user_id,
            self.ttl,
        )
        .await?;

        if newly_active {
            if let Err(e) = self.provider.append_addresses(&[sub.kol_wallet.clone()]).await {
                tracing::warn!(
                    kol_wallet = %sub.kol_wallet,
                    error = %e,
                    "Provider registration failed — will reconcile on next sync"
                );
            } else {
                tracing::info!(kol_wallet = %sub.kol_wallet, "KOL wallet registered with provider");
            }
        }

        Ok(subs)
    }

    /// Remove the (user, KOL wallet) subscription, dropping the wallet
    /// from the active set and the provider when its last subscriber
    /// leaves. Returns the user's remaining subscriptions.
    pub async fn remove_subscription(
        &self,
        user_id: &str,
        kol_wallet: &str,
    ) -> anyhow::Result<Vec<Subscription>> {
        let _user_guard = self.user_locks.lock(user_id).await;

        let mut subs =
            subscription_repo::load_user_subscriptions(self.kv.as_ref(), &self.keys, user_id).await?;
        let before = subs.len();
        subs.retain(|sub| sub.kol_wallet != kol_wallet);
        if subs.len() == before {
            return Ok(subs);
        }

        subscription_repo::save_user_subscriptions(self.kv.as_ref(), &self.keys, user_id, &subs, self.ttl)
            .await?;

        let _registry_guard = self.registry_lock.lock().await;
        let now_inactive =
            subscription_repo::remove_subscriber(self.kv.as_ref(), &self.keys, kol_wallet, user_id)
                .await?;

        if now_inactive {
            if let Err(e) = self.provider.remove_addresses(&[kol_wallet.to_string()]).await {
                tracing::warn!(
                    kol_wallet = %kol_wallet,
                    error = %e,
                    "Provider deregistration failed — will reconcile on next sync"
                );
            } else {
                tracing::info!(kol_wallet = %kol_wallet, "KOL wallet removed from provider");
            }
        }

        Ok(subs)
    }

    /// User ids subscribed to a KOL wallet. Never fails.
    pub async fn get_users_for_kol(&self, kol_wallet: &str) -> Vec<String> {
        subscription_repo::users_for_kol(self.kv.as_ref(), &self.keys, kol_wallet)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(kol_wallet = %kol_wallet, error = %e, "Subscriber read failed — returning empty");
                Vec::new()
            })
    }

    /// Join the subscriber set with each user's subscription list,
    /// filtered to this KOL. Never fails.
    pub async fn get_subscriptions_for_kol(&self, kol_wallet: &str) -> Vec<Subscription> {
        let mut result = Vec::new();
        for user_id in self.get_users_for_kol(kol_wallet).await {
            let subs = self.get_user_subscriptions(&user_id).await;
            result.extend(subs.into_iter().filter(|sub| sub.kol_wallet == kol_wallet));
        }
        result
    }

    /// The active watch list. Never fails.
    pub async fn get_watched_kol_wallets(&self) -> HashSet<String> {
        subscription_repo::watched_kols(self.kv.as_ref(), &self.keys)
            .await
            .map(|wallets| wallets.into_iter().collect())
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Active-set read failed — returning empty");
                HashSet::new()
            })
    }

    /// Idempotent reconciliation of the provider's watch list against the
    /// active set: missing wallets are appended, stale ones removed.
    pub async fn sync_with_provider(&self) -> anyhow::Result<()> {
        let _registry_guard = self.registry_lock.lock().await;

        let active = self.get_watched_kol_wallets().await;
        let watched: HashSet<String> = self.provider.watched_addresses().await?.into_iter().collect();

        let to_add: Vec<String> = active.difference(&watched).cloned().collect();
        let to_remove: Vec<String> = watched.difference(&active).cloned().collect();

        if to_add.is_empty() && to_remove.is_empty() {
            tracing::debug!("Provider watch list already in sync");
            return Ok(());
        }

        tracing::info!(
            adding = to_add.len(),
            removing = to_remove.len(),
            "Reconciling provider watch list"
        );

        if !to_add.is_empty() {
            self.provider.append_addresses(&to_add).await?;
        }
        if !to_remove.is_empty() {
            self.provider.remove_addresses(&to_remove).await?;
        }

        metrics::gauge!("active_kol_wallets").set(active.len() as f64);
        Ok(())
    }
}
