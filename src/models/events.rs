use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Subscription, Trade, TradeSide, WatchConfig};

/// Published on the copy-trade-events exchange under `kol.trade.detected`,
/// once per classified trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeDetectedEvent {
    pub trade: Trade,
    pub subscriptions: Vec<Subscription>,
    pub estimated_copy_count: usize,
    /// Scorer output for predictable KOLs; 0 when the scorer is disabled
    /// or failed.
    pub prediction: f64,
}

/// Published on the notifications exchange under `client.notification`,
/// once per matched subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientNotification {
    pub user_id: String,
    pub notification_type: String,
    pub trade: Trade,
    pub subscription: Subscription,
    pub estimated_copy_amount: Decimal,
}

impl ClientNotification {
    pub fn trade_detected(trade: &Trade, subscription: &Subscription) -> Self {
        let estimated = trade.quote_amount * subscription.copy_percentage / Decimal::from(100);
        Self {
            user_id: subscription.user_id.clone(),
            notification_type: "trade_detected".into(),
            trade: trade.clone(),
            subscription: subscription.clone(),
            estimated_copy_amount: estimated,
        }
    }
}

/// One element of the batched copy-trade command sent to the execution
/// service. The credential passes through opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyTradeOrder {
    pub agent_id: String,
    pub trade_type: TradeSide,
    pub amount: Option<Decimal>,
    pub private_key: String,
    pub mint: String,
    pub priority: String,
    pub watch_config: Option<WatchConfig>,
}

impl CopyTradeOrder {
    pub fn from_subscription(trade: &Trade, subscription: &Subscription) -> Self {
        Self {
            agent_id: subscription.user_id.clone(),
            trade_type: trade.side,
            amount: subscription.min_amount,
            private_key: subscription.private_key.clone(),
            mint: trade.token_mint.clone(),
            priority: "high".into(),
            watch_config: subscription.watch_config.clone(),
        }
    }
}

/// Published under `copy.trade.request`; one batch per inbound trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyTradeBatch {
    pub trade_id: uuid::Uuid,
    pub trades: Vec<CopyTradeOrder>,
}

// ---------------------------------------------------------------------------
// RPC envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    pub success: bool,
    pub message: String,
    pub data: Value,
}

impl RpcResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            message: "ok".into(),
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn invalid_method() -> Self {
        Self {
            success: false,
            message: "Invalid method".into(),
            data: Value::Null,
        }
    }
}
