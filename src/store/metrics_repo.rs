use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Keyspace, Kv};

/// TTL on `metrics:counter:{name}` keys.
const COUNTER_TTL: Duration = Duration::from_secs(86_400);

/// Operational snapshot persisted under `metrics:current` after each
/// webhook batch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    pub transactions_processed: u64,
    pub trades_detected: u64,
    pub notifications_published: u64,
    pub copy_trades_dispatched: u64,
    pub quota_denied: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Bump a named daily counter. Failures are logged, never surfaced —
/// metrics must not affect the trade path.
pub async fn increment_counter(kv: &dyn Kv, keys: &Keyspace, name: &str) {
    if let Err(e) = kv.incr(&keys.metrics_counter(name), Some(COUNTER_TTL)).await {
        tracing::debug!(counter = name, error = %e, "Failed to bump KV counter");
    }
}

pub async fn save_current(kv: &dyn Kv, keys: &Keyspace, metrics: &ServiceMetrics) {
    let encoded = match serde_json::to_string(metrics) {
        Ok(s) => s,
        Err(_) => return,
    };
    if let Err(e) = kv.set(&keys.metrics_current(), &encoded, Some(COUNTER_TTL)).await {
        tracing::debug!(error = %e, "Failed to persist service metrics snapshot");
    }
}

pub async fn load_current(kv: &dyn Kv, keys: &Keyspace) -> Option<ServiceMetrics> {
    let raw = kv.get(&keys.metrics_current()).await.ok()??;
    serde_json::from_str(&raw).ok()
}
