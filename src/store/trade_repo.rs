use std::time::Duration;

use crate::models::Trade;

use super::{Keyspace, Kv};

/// Per-KOL recent-trades cap.
pub const KOL_RECENT_CAP: isize = 100;
/// Global recent-trades cap.
pub const GLOBAL_RECENT_CAP: isize = 1000;

/// Persist one classified trade: detail key, per-KOL recent index, global
/// recent index. Both sorted sets are trimmed to their caps in the same
/// call.
pub async fn persist_trade(
    kv: &dyn Kv,
    keys: &Keyspace,
    trade: &Trade,
    ttl: Option<Duration>,
) -> anyhow::Result<()> {
    let encoded = serde_json::to_string(trade)?;
    let score = trade.timestamp_ms() as f64;

    kv.set(&keys.trade_detail(&trade.kol_wallet, &trade.id), &encoded, ttl)
        .await?;

    let kol_key = keys.trade_recent_for_kol(&trade.kol_wallet);
    kv.zadd(&kol_key, score, &trade.id.to_string(), ttl).await?;
    kv.zremrangebyrank(&kol_key, 0, -(KOL_RECENT_CAP + 1)).await?;

    let global_key = keys.trade_recent_global();
    kv.zadd(&global_key, score, &encoded, ttl).await?;
    kv.zremrangebyrank(&global_key, 0, -(GLOBAL_RECENT_CAP + 1)).await?;

    Ok(())
}

/// Newest-first trade ids for one KOL.
pub async fn recent_trade_ids_for_kol(
    kv: &dyn Kv,
    keys: &Keyspace,
    kol_wallet: &str,
    limit: usize,
) -> anyhow::Result<Vec<String>> {
    kv.zrevrange(
        &keys.trade_recent_for_kol(kol_wallet),
        0,
        limit.saturating_sub(1) as isize,
    )
    .await
}

pub async fn load_trade(
    kv: &dyn Kv,
    keys: &Keyspace,
    kol_wallet: &str,
    trade_id: &uuid::Uuid,
) -> anyhow::Result<Option<Trade>> {
    let Some(raw) = kv.get(&keys.trade_detail(kol_wallet, trade_id)).await? else {
        return Ok(None);
    };
    Ok(serde_json::from_str(&raw).ok())
}

/// Newest-first full trades for one KOL, joining the recent index with the
/// detail keys. Ids whose detail key already expired are skipped.
pub async fn recent_trades_for_kol(
    kv: &dyn Kv,
    keys: &Keyspace,
    kol_wallet: &str,
    limit: usize,
) -> anyhow::Result<Vec<Trade>> {
    let ids = recent_trade_ids_for_kol(kv, keys, kol_wallet, limit).await?;
    let mut trades = Vec::with_capacity(ids.len());
    for id in ids {
        let Ok(id) = id.parse::<uuid::Uuid>() else {
            continue;
        };
        if let Some(trade) = load_trade(kv, keys, kol_wallet, &id).await? {
            trades.push(trade);
        }
    }
    Ok(trades)
}

/// Newest-first trades across every KOL; members of the global index carry
/// the full trade payload.
pub async fn global_recent_trades(
    kv: &dyn Kv,
    keys: &Keyspace,
    limit: usize,
) -> anyhow::Result<Vec<Trade>> {
    let members = kv
        .zrevrange(&keys.trade_recent_global(), 0, limit.saturating_sub(1) as isize)
        .await?;
    Ok(members
        .iter()
        .filter_map(|raw| serde_json::from_str(raw).ok())
        .collect())
}
