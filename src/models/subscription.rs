use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What a subscriber wants from a KOL.
///
/// `Watch` receives notifications only; `Trade` additionally triggers
/// copy-trade dispatch (subject to the purchase quota).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    Trade,
    Watch,
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionType::Trade => f.write_str("trade"),
            SubscriptionType::Watch => f.write_str("watch"),
        }
    }
}

/// Exit parameters forwarded to the execution service with each copy order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    pub take_profit_pct: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
    pub max_hold_minutes: Option<u32>,
}

/// UTC hour window during which copy orders may be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingHours {
    pub start_hour: u8,
    pub end_hour: u8,
}

/// Per-subscription guard rails checked at fan-out time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SafetySettings {
    pub max_slippage_pct: Option<Decimal>,
    pub dex_whitelist: Option<Vec<String>>,
    pub token_blacklist: Option<Vec<String>>,
    pub trading_hours: Option<TradingHours>,
}

/// One user's subscription to one KOL wallet. (user_id, kol_wallet) is
/// unique; re-adding replaces the prior record.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Assigned by the registry on insert; client payloads may omit it.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub user_id: String,
    pub kol_wallet: String,
    /// The subscriber's own chain address orders are executed from.
    pub wallet_address: String,
    /// Opaque signing credential, passed through to the execution service.
    /// Never logged and never indexed.
    pub private_key: String,
    #[serde(rename = "type")]
    pub kind: SubscriptionType,
    #[serde(default = "default_active")]
    pub active: bool,
    pub copy_percentage: Decimal,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub token_buy_count: Option<u32>,
    pub watch_config: Option<WatchConfig>,
    pub safety: Option<SafetySettings>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

// The credential must not leak through debug logging.
impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("kol_wallet", &self.kol_wallet)
            .field("wallet_address", &self.wallet_address)
            .field("private_key", &"<redacted>")
            .field("kind", &self.kind)
            .field("active", &self.active)
            .field("copy_percentage", &self.copy_percentage)
            .field("token_buy_count", &self.token_buy_count)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// True when the copy-trade path must pass the purchase-quota gate.
    pub fn is_quota_gated(&self) -> bool {
        self.kind == SubscriptionType::Trade
            && self.token_buy_count.map_or(false, |n| n > 0)
            && self.watch_config.is_some()
    }
}
