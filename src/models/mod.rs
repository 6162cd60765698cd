pub mod events;
pub mod quota;
pub mod subscription;
pub mod trade;
pub mod webhook;

pub use events::{ClientNotification, CopyTradeBatch, CopyTradeOrder, RpcRequest, RpcResponse, TradeDetectedEvent};
pub use quota::{PurchaseRecord, QuotaCheck, QuotaIncrement};
pub use subscription::{SafetySettings, Subscription, SubscriptionType, TradingHours, WatchConfig};
pub use trade::Trade;
pub use webhook::{AccountData, EnhancedTransaction, NativeTransfer, RawTokenAmount, TokenBalanceChange, TokenTransfer};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical wrapped-native mint — the quote asset for every classified swap.
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Native unit exponent: 1 SOL = 10^9 lamports.
pub const NATIVE_DECIMALS: u32 = 9;

// ---------------------------------------------------------------------------
// TradeSide
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Some(TradeSide::Buy),
            "sell" => Some(TradeSide::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
