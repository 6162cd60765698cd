use serde::{Deserialize, Serialize};

/// One transaction record as delivered by the provider's enhanced webhook.
/// Every field is optional or defaulted — the provider omits fields freely
/// and a malformed record must never fail the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EnhancedTransaction {
    pub signature: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub source: Option<String>,
    pub description: Option<String>,
    pub fee: Option<u64>,
    pub fee_payer: Option<String>,
    pub slot: Option<u64>,
    /// Unix seconds.
    pub timestamp: Option<i64>,
    pub account_data: Vec<AccountData>,
    pub native_transfers: Vec<NativeTransfer>,
    pub token_transfers: Vec<TokenTransfer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountData {
    pub account: String,
    /// Signed delta in native minor units (lamports).
    pub native_balance_change: i64,
    pub token_balance_changes: Vec<TokenBalanceChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenBalanceChange {
    pub user_account: String,
    pub token_account: Option<String>,
    pub mint: String,
    pub raw_token_amount: RawTokenAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTokenAmount {
    /// Signed integer string in token minor units.
    pub token_amount: String,
    pub decimals: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct NativeTransfer {
    pub from_user_account: Option<String>,
    pub to_user_account: Option<String>,
    pub amount: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenTransfer {
    pub from_user_account: Option<String>,
    pub to_user_account: Option<String>,
    pub mint: Option<String>,
    pub token_amount: Option<f64>,
}

/// Closed discriminator over the provider's `type` field. Only the
/// swap family feeds the classifier; everything else is dropped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    Swap,
    Other(String),
}

impl EnhancedTransaction {
    pub fn kind(&self) -> TransactionKind {
        if self.tx_type.to_ascii_uppercase().starts_with("SWAP") {
            TransactionKind::Swap
        } else {
            TransactionKind::Other(self.tx_type.clone())
        }
    }

    /// All wallet addresses mentioned anywhere in the record, in scan order:
    /// account data, native transfers, token transfers, fee payer.
    pub fn mentioned_addresses(&self) -> impl Iterator<Item = &str> {
        self.account_data
            .iter()
            .map(|a| a.account.as_str())
            .chain(self.native_transfers.iter().flat_map(|t| {
                t.from_user_account
                    .as_deref()
                    .into_iter()
                    .chain(t.to_user_account.as_deref())
            }))
            .chain(self.token_transfers.iter().flat_map(|t| {
                t.from_user_account
                    .as_deref()
                    .into_iter()
                    .chain(t.to_user_account.as_deref())
            }))
            .chain(self.fee_payer.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_discriminates_swap_family() {
        let mut tx = EnhancedTransaction {
            tx_type: "SWAP".into(),
            ..Default::default()
        };
        assert_eq!(tx.kind(), TransactionKind::Swap);

        tx.tx_type = "SWAP_EXACT_OUT".into();
        assert_eq!(tx.kind(), TransactionKind::Swap);

        tx.tx_type = "NFT_SALE".into();
        assert_eq!(tx.kind(), TransactionKind::Other("NFT_SALE".into()));
    }

    #[test]
    fn test_payload_parses_with_missing_fields() {
        let raw = r#"{
            "signature": "sig1",
            "type": "SWAP",
            "accountData": [
                {"account": "W", "nativeBalanceChange": -50000000,
                 "tokenBalanceChanges": [
                    {"userAccount": "W", "mint": "M",
                     "rawTokenAmount": {"tokenAmount": "1000000000", "decimals": 6}}
                 ]}
            ]
        }"#;
        let tx: EnhancedTransaction = serde_json::from_str(raw).unwrap();
        assert_eq!(tx.signature, "sig1");
        assert_eq!(tx.account_data.len(), 1);
        assert_eq!(tx.account_data[0].native_balance_change, -50_000_000);
        assert!(tx.fee_payer.is_none());
        assert!(tx.native_transfers.is_empty());
    }

    #[test]
    fn test_mentioned_addresses_scan_order() {
        let tx = EnhancedTransaction {
            account_data: vec![AccountData {
                account: "A".into(),
                ..Default::default()
            }],
            native_transfers: vec![NativeTransfer {
                from_user_account: Some("B".into()),
                to_user_account: Some("C".into()),
                amount: Some(1),
            }],
            fee_payer: Some("D".into()),
            ..Default::default()
        };
        let seen: Vec<&str> = tx.mentioned_addresses().collect();
        assert_eq!(seen, vec!["A", "B", "C", "D"]);
    }
}
