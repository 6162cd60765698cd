use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::models::{EnhancedTransaction, TradeSide, NATIVE_DECIMALS, WRAPPED_SOL_MINT};

/// The classifier's verdict for one transaction: the owner's net swap.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedSwap {
    pub side: TradeSide,
    pub token_mint: String,
    pub token_amount: Decimal,
    pub quote_amount: Decimal,
}

/// Classify a transaction from its balance deltas.
///
/// Builds per-account per-mint net changes (native deltas land under the
/// wrapped-native mint), picks the account to analyze — `target_user` when
/// supplied, otherwise the first account with any non-zero change — and
/// requires exactly one non-native leg against a non-zero native leg.
///
/// Pure and total: malformed numeric strings count as zero, anything that
/// doesn't shape up as a single-token swap returns `None`.
pub fn classify_swap(tx: &EnhancedTransaction, target_user: Option<&str>) -> Option<ClassifiedSwap> {
    let (order, deltas) = build_deltas(tx);

    let user = match target_user {
        Some(user) => user.to_string(),
        None => order
            .iter()
            .find(|account| {
                deltas
                    .get(*account)
                    .is_some_and(|mints| mints.values().any(|d| !d.is_zero()))
            })?
            .clone(),
    };

    let mints = deltas.get(&user)?;
    let native_delta = mints.get(WRAPPED_SOL_MINT).copied().unwrap_or_default();

    let non_native: Vec<(&String, Decimal)> = mints
        .iter()
        .filter(|(mint, _)| mint.as_str() != WRAPPED_SOL_MINT)
        .map(|(mint, delta)| (mint, *delta))
        .collect();

    if non_native.len() != 1 {
        return None;
    }
    let (token_mint, token_delta) = (non_native[0].0.clone(), non_native[0].1);

    if native_delta.is_zero() || token_delta.is_zero() {
        return None;
    }

    let side = if native_delta < Decimal::ZERO && token_delta > Decimal::ZERO {
        TradeSide::Buy
    } else if token_delta < Decimal::ZERO && native_delta > Decimal::ZERO {
        TradeSide::Sell
    } else {
        return None;
    };

    Some(ClassifiedSwap {
        side,
        token_mint,
        token_amount: token_delta.abs(),
        quote_amount: native_delta.abs(),
    })
}

/// Accumulate account → mint → net change, preserving first-seen account
/// order so the fallback user selection is deterministic.
fn build_deltas(tx: &EnhancedTransaction) -> (Vec<String>, HashMap<String, HashMap<String, Decimal>>) {
    let mut order: Vec<String> = Vec::new();
    let mut deltas: HashMap<String, HashMap<String, Decimal>> = HashMap::new();

    for account_data in &tx.account_data {
        if account_data.native_balance_change != 0 {
            *account_entry(&mut order, &mut deltas, &account_data.account)
                .entry(WRAPPED_SOL_MINT.to_string())
                .or_default() += Decimal::new(account_data.native_balance_change, NATIVE_DECIMALS);
        }
        for change in &account_data.token_balance_changes {
            let amount = scale_raw_amount(
                &change.raw_token_amount.token_amount,
                change.raw_token_amount.decimals,
            );
            *account_entry(&mut order, &mut deltas, &change.user_account)
                .entry(change.mint.clone())
                .or_default() += amount;
        }
    }

    (order, deltas)
}

fn account_entry<'a>(
    order: &mut Vec<String>,
    deltas: &'a mut HashMap<String, HashMap<String, Decimal>>,
    account: &str,
) -> &'a mut HashMap<String, Decimal> {
    if !deltas.contains_key(account) {
        order.push(account.to_string());
    }
    deltas.entry(account.to_string()).or_default()
}

/// Convert a raw integer string + decimals to a decimal amount.
/// Unparsable input counts as zero.
fn scale_raw_amount(raw: &str, decimals: u32) -> Decimal {
    if decimals > 28 {
        return Decimal::ZERO;
    }
    let Ok(raw) = raw.trim().parse::<Decimal>() else {
        return Decimal::ZERO;
    };
    raw * Decimal::from_i128_with_scale(1, decimals)
}

// ---------------------------------------------------------------------------
// DEX label inference
// ---------------------------------------------------------------------------

const DEX_LABELS: &[(&str, &str)] = &[
    ("jupiter", "Jupiter"),
    ("raydium", "Raydium"),
    ("orca", "Orca"),
    ("pump", "PumpSwap"),
    ("meteora", "Meteora"),
    ("phoenix", "Phoenix"),
    ("lifinity", "Lifinity"),
];

/// Infer the DEX program label from the payload's `source` or
/// `description`, case-insensitively. Unrecognized programs label as
/// "unknown".
pub fn infer_dex_label(source: Option<&str>, description: Option<&str>) -> String {
    for haystack in [source, description].into_iter().flatten() {
        let haystack = haystack.to_ascii_lowercase();
        for (needle, label) in DEX_LABELS {
            if haystack.contains(needle) {
                return (*label).to_string();
            }
        }
    }
    "unknown".to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountData, RawTokenAmount, TokenBalanceChange};
    use std::str::FromStr;

    fn swap_tx(native_change: i64, token_changes: Vec<(&str, &str, &str, u32)>) -> EnhancedTransaction {
        EnhancedTransaction {
            signature: "sig".into(),
            tx_type: "SWAP".into(),
            account_data: vec![AccountData {
                account: "W".into(),
                native_balance_change: native_change,
                token_balance_changes: token_changes
                    .into_iter()
                    .map(|(user, mint, raw, decimals)| TokenBalanceChange {
                        user_account: user.into(),
                        token_account: None,
                        mint: mint.into(),
                        raw_token_amount: RawTokenAmount {
                            token_amount: raw.into(),
                            decimals,
                        },
                    })
                    .collect(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_classifies_buy() {
        // -0.05 native, +1000 tokens of M at 6 decimals.
        let tx = swap_tx(-50_000_000, vec![("W", "M", "1000000000", 6)]);
        let swap = classify_swap(&tx, Some("W")).unwrap();
        assert_eq!(swap.side, TradeSide::Buy);
        assert_eq!(swap.token_mint, "M");
        assert_eq!(swap.token_amount, Decimal::from(1000));
        assert_eq!(swap.quote_amount, Decimal::from_str("0.05").unwrap());
    }

    #[test]
    fn test_classifies_sell() {
        let tx = swap_tx(100_000_000, vec![("W", "M", "-500000000", 6)]);
        let swap = classify_swap(&tx, Some("W")).unwrap();
        assert_eq!(swap.side, TradeSide::Sell);
        assert_eq!(swap.token_amount, Decimal::from(500));
        assert_eq!(swap.quote_amount, Decimal::from_str("0.1").unwrap());
    }

    #[test]
    fn test_no_token_legs_is_unclassified() {
        let tx = swap_tx(-50_000_000, vec![]);
        assert!(classify_swap(&tx, Some("W")).is_none());
    }

    #[test]
    fn test_two_token_legs_is_unclassified() {
        let tx = swap_tx(
            -50_000_000,
            vec![("W", "M1", "1000000", 6), ("W", "M2", "2000000", 6)],
        );
        assert!(classify_swap(&tx, Some("W")).is_none());
    }

    #[test]
    fn test_zero_native_delta_is_unclassified() {
        let tx = swap_tx(0, vec![("W", "M", "1000000000", 6)]);
        assert!(classify_swap(&tx, Some("W")).is_none());
    }

    #[test]
    fn test_same_sign_legs_are_unclassified() {
        // Both positive: airdrops plus rent refunds, not a swap.
        let tx = swap_tx(50_000_000, vec![("W", "M", "1000000", 6)]);
        assert!(classify_swap(&tx, Some("W")).is_none());
    }

    #[test]
    fn test_malformed_raw_amount_counts_as_zero() {
        let tx = swap_tx(-50_000_000, vec![("W", "M", "not-a-number", 6)]);
        assert!(classify_swap(&tx, Some("W")).is_none());
    }

    #[test]
    fn test_falls_back_to_first_account_with_change() {
        let mut tx = swap_tx(-50_000_000, vec![("W", "M", "1000000000", 6)]);
        // A zero-change account ahead of W must not be selected.
        tx.account_data.insert(
            0,
            AccountData {
                account: "Pool".into(),
                native_balance_change: 0,
                token_balance_changes: vec![],
            },
        );
        let swap = classify_swap(&tx, None).unwrap();
        assert_eq!(swap.side, TradeSide::Buy);
        assert_eq!(swap.token_mint, "M");
    }

    #[test]
    fn test_deltas_accumulate_across_accounts() {
        // Two partial fills for the same mint net into one leg.
        let mut tx = swap_tx(-50_000_000, vec![("W", "M", "600000000", 6)]);
        tx.account_data.push(AccountData {
            account: "Vault".into(),
            native_balance_change: 0,
            token_balance_changes: vec![TokenBalanceChange {
                user_account: "W".into(),
                token_account: None,
                mint: "M".into(),
                raw_token_amount: RawTokenAmount {
                    token_amount: "400000000".into(),
                    decimals: 6,
                },
            }],
        });
        let swap = classify_swap(&tx, Some("W")).unwrap();
        assert_eq!(swap.token_amount, Decimal::from(1000));
    }

    #[test]
    fn test_dex_label_inference() {
        assert_eq!(infer_dex_label(Some("JUPITER"), None), "Jupiter");
        assert_eq!(infer_dex_label(None, Some("swapped on Raydium AMM")), "Raydium");
        assert_eq!(infer_dex_label(Some("PUMP_AMM"), None), "PumpSwap");
        assert_eq!(infer_dex_label(Some("somewhere"), Some("else")), "unknown");
        assert_eq!(infer_dex_label(None, None), "unknown");
    }
}
