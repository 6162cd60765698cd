use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted state of one (user, token) purchase counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub user_id: String,
    pub token_mint: String,
    pub current_count: u32,
    pub max_count: u32,
    pub last_purchase_at: DateTime<Utc>,
    pub subscription_id: Uuid,
}

/// Result of the advisory pre-check. May race; never authoritative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaCheck {
    pub can_purchase: bool,
    pub current: u32,
    pub max: u32,
    pub remaining: u32,
}

/// Result of the authoritative increment-and-validate sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaIncrement {
    pub success: bool,
    pub new_count: u32,
    pub was_at_limit: bool,
}
