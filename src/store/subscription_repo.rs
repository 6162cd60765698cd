use std::time::Duration;

use crate::models::Subscription;

use super::{Keyspace, Kv};

/// Load a user's subscription list. Absent key decodes to an empty list;
/// a corrupt value is treated the same way (and logged) so one bad record
/// can never wedge the fan-out path.
pub async fn load_user_subscriptions(
    kv: &dyn Kv,
    keys: &Keyspace,
    user_id: &str,
) -> anyhow::Result<Vec<Subscription>> {
    let Some(raw) = kv.get(&keys.user_subscriptions(user_id)).await? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(&raw) {
        Ok(subs) => Ok(subs),
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Discarding undecodable subscription list");
            Ok(Vec::new())
        }
    }
}

/// Persist a user's full subscription list as one value. An empty list
/// deletes the key instead of storing `[]`.
pub async fn save_user_subscriptions(
    kv: &dyn Kv,
    keys: &Keyspace,
    user_id: &str,
    subs: &[Subscription],
    ttl: Option<Duration>,
) -> anyhow::Result<()> {
    let key = keys.user_subscriptions(user_id);
    if subs.is_empty() {
        kv.del(&[key.as_str()]).await?;
        return Ok(());
    }
    let encoded = serde_json::to_string(subs)?;
    kv.set(&key, &encoded, ttl).await
}

/// Record `user_id` as a subscriber of `kol_wallet` and mark the wallet
/// active. Returns true when the wallet was not active before — the caller
/// must then register it with the external provider.
pub async fn add_subscriber(
    kv: &dyn Kv,
    keys: &Keyspace,
    kol_wallet: &str,
    user_id: &str,
    ttl: Option<Duration>,
) -> anyhow::Result<bool> {
    kv.sadd(&keys.kol_subscribers(kol_wallet), user_id, ttl).await?;
    let newly_active = kv.sadd(&keys.kol_active(), kol_wallet, ttl).await?;
    Ok(newly_active == 1)
}

/// Drop `user_id` from the wallet's subscriber set. Returns true when the
/// set became empty and the wallet was removed from the active set — the
/// caller must then deregister it with the external provider.
pub async fn remove_subscriber(
    kv: &dyn Kv,
    keys: &Keyspace,
    kol_wallet: &str,
    user_id: &str,
) -> anyhow::Result<bool> {
    kv.srem(&keys.kol_subscribers(kol_wallet), user_id).await?;
    if kv.scard(&keys.kol_subscribers(kol_wallet)).await? > 0 {
        return Ok(false);
    }
    kv.srem(&keys.kol_active(), kol_wallet).await?;
    Ok(true)
}

pub async fn users_for_kol(
    kv: &dyn Kv,
    keys: &Keyspace,
    kol_wallet: &str,
) -> anyhow::Result<Vec<String>> {
    kv.smembers(&keys.kol_subscribers(kol_wallet)).await
}

pub async fn watched_kols(kv: &dyn Kv, keys: &Keyspace) -> anyhow::Result<Vec<String>> {
    kv.smembers(&keys.kol_active()).await
}
