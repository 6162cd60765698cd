use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TradeSide;

/// A classified KOL swap. Immutable once produced by the classifier;
/// `quote_mint` is always the canonical wrapped-native mint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: Uuid,
    pub kol_wallet: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub side: TradeSide,
    pub token_mint: String,
    pub quote_mint: String,
    pub token_amount: Decimal,
    pub quote_amount: Decimal,
    pub dex: String,
    pub slot: Option<u64>,
    pub fee: Option<u64>,
}

impl Trade {
    /// Event time in epoch milliseconds, used as the sorted-set score for
    /// recent-trade indexes.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}
