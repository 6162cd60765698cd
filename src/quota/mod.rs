use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::models::{PurchaseRecord, QuotaCheck, QuotaIncrement};
use crate::store::{Keyspace, Kv};

/// Per-(user, token) purchase limiter over the store's atomic counter
/// primitives.
///
/// `increment_and_validate` is the authoritative gate: the counter is
/// bumped first and rolled back when the bump overshoots, so it can never
/// permanently exceed the limit even under concurrent callers. The
/// `can_purchase` pre-check is advisory only and may race.
pub struct QuotaGate {
    kv: Arc<dyn Kv>,
    keys: Keyspace,
    ttl: Duration,
}

impl QuotaGate {
    pub fn new(kv: Arc<dyn Kv>, keys: Keyspace, ttl: Duration) -> Self {
        Self { kv, keys, ttl }
    }

    /// Advisory single-key read. Fails open: when the store is
    /// unavailable trading must not block, so the answer is yes.
    pub async fn can_purchase(&self, user_id: &str, token_mint: &str, max_count: u32) -> QuotaCheck {
        let key = self.keys.token_buy_count(user_id, token_mint);
        let current = match self.kv.get(&key).await {
            Ok(value) => value.and_then(|v| v.parse::<u32>().ok()).unwrap_or(0),
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    token_mint = %token_mint,
                    error = %e,
                    "Quota pre-check failed — failing open"
                );
                0
            }
        };

        QuotaCheck {
            can_purchase: current < max_count,
            current,
            max: max_count,
            remaining: max_count.saturating_sub(current),
        }
    }

    /// Authoritative gate: atomically increment + refresh TTL, then
    /// validate. An increment past the limit is rolled back with a
    /// decrement and reported as at-limit. Fails closed: store trouble
    /// denies the purchase.
    pub async fn increment_and_validate(
        &self,
        user_id: &str,
        token_mint: &str,
        max_count: u32,
        subscription_id: Uuid,
    ) -> QuotaIncrement {
        let counter_key = self.keys.token_buy_count(user_id, token_mint);

        let new_count = match self.kv.incr(&counter_key, Some(self.ttl)).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    token_mint = %token_mint,
                    error = %e,
                    "Quota increment failed — denying purchase"
                );
                return QuotaIncrement {
                    success: false,
                    new_count: 0,
                    was_at_limit: false,
                };
            }
        };

        if new_count > max_count as i64 {
            // Overshot: restore the counter before reporting.
            match self.kv.decr(&counter_key).await {
                Ok(restored) => {
                    return QuotaIncrement {
                        success: false,
                        new_count: restored.max(0) as u32,
                        was_at_limit: true,
                    };
                }
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        token_mint = %token_mint,
                        error = %e,
                        "Quota rollback decrement failed"
                    );
                    return QuotaIncrement {
                        success: false,
                        new_count: (new_count - 1).max(0) as u32,
                        was_at_limit: true,
                    };
                }
            }
        }

        let record = PurchaseRecord {
            user_id: user_id.to_string(),
            token_mint: token_mint.to_string(),
            current_count: new_count as u32,
            max_count,
            last_purchase_at: Utc::now(),
            subscription_id,
        };
        self.write_record(&record).await;

        QuotaIncrement {
            success: true,
            new_count: new_count as u32,
            was_at_limit: false,
        }
    }

    pub async fn get_record(&self, user_id: &str, token_mint: &str) -> Option<PurchaseRecord> {
        let key = self.keys.token_purchase_record(user_id, token_mint);
        let raw = self.kv.get(&key).await.ok()??;
        serde_json::from_str(&raw).ok()
    }

    /// Delete counter and record in one round trip.
    pub async fn reset(&self, user_id: &str, token_mint: &str) -> bool {
        let counter_key = self.keys.token_buy_count(user_id, token_mint);
        let record_key = self.keys.token_purchase_record(user_id, token_mint);
        match self.kv.del(&[counter_key.as_str(), record_key.as_str()]).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    token_mint = %token_mint,
                    error = %e,
                    "Quota reset failed"
                );
                false
            }
        }
    }

    async fn write_record(&self, record: &PurchaseRecord) {
        let key = self.keys.token_purchase_record(&record.user_id, &record.token_mint);
        let encoded = match serde_json::to_string(record) {
            Ok(s) => s,
            Err(_) => return,
        };
        if let Err(e) = self.kv.set(&key, &encoded, Some(self.ttl)).await {
            tracing::warn!(
                user_id = %record.user_id,
                token_mint = %record.token_mint,
                error = %e,
                "Failed to persist purchase record"
            );
        }
    }
}
