mod common;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use kolbot::bus::{BusTopology, MemoryPublisher};
use kolbot::dispatcher::{Dispatcher, DispatcherConfig};
use kolbot::models::webhook::{AccountData, RawTokenAmount, TokenBalanceChange};
use kolbot::models::{EnhancedTransaction, SafetySettings, SubscriptionType};
use kolbot::quota::QuotaGate;
use kolbot::registry::KolRegistry;
use kolbot::store::trade_repo;

use common::RecordingProvider;

const TOKEN_MINT: &str = "TokenMint1111111111111111111111111111111111";

struct Harness {
    kv: Arc<kolbot::store::MemoryKv>,
    registry: Arc<KolRegistry>,
    publisher: Arc<MemoryPublisher>,
    dispatcher: Dispatcher,
}

fn harness() -> Harness {
    let kv = common::test_kv();
    let keys = common::test_keyspace();
    let provider = Arc::new(RecordingProvider::new());
    let registry = Arc::new(KolRegistry::new(
        kv.clone(),
        provider,
        keys.clone(),
        None,
    ));
    let quota = Arc::new(QuotaGate::new(kv.clone(), keys.clone(), Duration::from_secs(86_400)));
    let publisher = Arc::new(MemoryPublisher::new());

    let dispatcher = Dispatcher::new(
        kv.clone(),
        keys,
        Arc::clone(&registry),
        quota,
        publisher.clone(),
        BusTopology::new("production"),
        None,
        DispatcherConfig {
            trade_ttl: Some(Duration::from_secs(86_400)),
            predictable_kols: Default::default(),
        },
    );

    Harness {
        kv,
        registry,
        publisher,
        dispatcher,
    }
}

/// A single-hop buy: the KOL spends 0.05 native for 1000 tokens.
fn buy_tx(kol: &str) -> EnhancedTransaction {
    EnhancedTransaction {
        signature: "sig-buy-1".into(),
        tx_type: "SWAP".into(),
        source: Some("JUPITER".into()),
        description: Some(format!("{kol} swapped 0.05 SOL for 1000 TOKEN")),
        fee: Some(5000),
        fee_payer: Some(kol.into()),
        slot: Some(31_337),
        timestamp: Some(1_754_000_000),
        account_data: vec![AccountData {
            account: kol.into(),
            native_balance_change: -50_000_000,
            token_balance_changes: vec![TokenBalanceChange {
                user_account: kol.into(),
                token_account: None,
                mint: TOKEN_MINT.into(),
                raw_token_amount: RawTokenAmount {
                    token_amount: "1000000000".into(),
                    decimals: 6,
                },
            }],
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_fan_out_with_quota_gate_and_replay() {
    let h = harness();

    let mut gated = common::make_gated_subscription("U1", "K1", 1);
    gated.copy_percentage = Decimal::from(50);
    h.registry.add_subscription(gated).await.unwrap();
    h.registry
        .add_subscription(common::make_subscription("U2", "K1", SubscriptionType::Watch))
        .await
        .unwrap();

    h.dispatcher.process_batch(vec![buy_tx("K1")]).await;

    let messages = h.publisher.take().await;
    let detected: Vec<_> = messages.iter().filter(|m| m.routing_key == "kol.trade.detected").collect();
    let notifications: Vec<_> = messages.iter().filter(|m| m.routing_key == "client.notification").collect();
    let copy_requests: Vec<_> = messages.iter().filter(|m| m.routing_key == "copy.trade.request").collect();

    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].exchange, "copy_trade_events");
    assert_eq!(detected[0].payload["estimatedCopyCount"], 1);
    assert_eq!(detected[0].payload["trade"]["side"], "buy");
    assert_eq!(detected[0].payload["trade"]["tokenMint"], TOKEN_MINT);

    assert_eq!(notifications.len(), 2, "watch and trade subscribers both get notified");
    assert!(notifications.iter().all(|m| m.exchange == "notifications"));
    let u1_notification = notifications
        .iter()
        .find(|m| m.payload["userId"] == "U1")
        .expect("U1 notified");
    let estimated = Decimal::from_str(u1_notification.payload["estimatedCopyAmount"].as_str().unwrap()).unwrap();
    assert_eq!(estimated, Decimal::from_str("0.025").unwrap());

    assert_eq!(copy_requests.len(), 1);
    let orders = copy_requests[0].payload["trades"].as_array().unwrap();
    assert_eq!(orders.len(), 1, "watch subscriber excluded from copy dispatch");
    assert_eq!(orders[0]["agentId"], "U1");
    assert_eq!(orders[0]["tradeType"], "buy");
    assert_eq!(orders[0]["mint"], TOKEN_MINT);
    assert_eq!(orders[0]["priority"], "high");

    // Replay of the identical payload: U1's quota (1 buy) is spent, so no
    // copy-trade batch goes out, but both notifications still do.
    h.dispatcher.process_batch(vec![buy_tx("K1")]).await;

    let replay = h.publisher.take().await;
    assert_eq!(replay.iter().filter(|m| m.routing_key == "kol.trade.detected").count(), 1);
    assert_eq!(replay.iter().filter(|m| m.routing_key == "client.notification").count(), 2);
    assert_eq!(replay.iter().filter(|m| m.routing_key == "copy.trade.request").count(), 0);
}

#[tokio::test]
async fn test_transaction_without_watched_kol_is_dropped() {
    let h = harness();
    h.registry
        .add_subscription(common::make_subscription("U1", "K1", SubscriptionType::Trade))
        .await
        .unwrap();

    h.dispatcher.process_batch(vec![buy_tx("SomeoneElse")]).await;

    assert!(h.publisher.take().await.is_empty());
    let trades = trade_repo::recent_trades_for_kol(h.kv.as_ref(), &common::test_keyspace(), "K1", 10)
        .await
        .unwrap();
    assert!(trades.is_empty());
}

#[tokio::test]
async fn test_empty_batch_has_no_effect() {
    let h = harness();
    h.dispatcher.process_batch(Vec::new()).await;
    assert!(h.publisher.take().await.is_empty());
}

#[tokio::test]
async fn test_non_swap_transaction_is_dropped() {
    let h = harness();
    h.registry
        .add_subscription(common::make_subscription("U1", "K1", SubscriptionType::Trade))
        .await
        .unwrap();

    let mut tx = buy_tx("K1");
    tx.tx_type = "TRANSFER".into();
    h.dispatcher.process_batch(vec![tx]).await;

    assert!(h.publisher.take().await.is_empty());
}

#[tokio::test]
async fn test_unclassifiable_swap_is_dropped() {
    let h = harness();
    h.registry
        .add_subscription(common::make_subscription("U1", "K1", SubscriptionType::Trade))
        .await
        .unwrap();

    let mut tx = buy_tx("K1");
    tx.account_data[0].native_balance_change = 0;
    h.dispatcher.process_batch(vec![tx]).await;

    assert!(h.publisher.take().await.is_empty());
}

#[tokio::test]
async fn test_trade_is_persisted_with_dex_label() {
    let h = harness();
    h.registry
        .add_subscription(common::make_subscription("U1", "K1", SubscriptionType::Trade))
        .await
        .unwrap();

    h.dispatcher.process_batch(vec![buy_tx("K1")]).await;

    let trades = trade_repo::recent_trades_for_kol(h.kv.as_ref(), &common::test_keyspace(), "K1", 10)
        .await
        .unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].dex, "Jupiter");
    assert_eq!(trades[0].signature, "sig-buy-1");
    assert_eq!(trades[0].slot, Some(31_337));

    let global = trade_repo::global_recent_trades(h.kv.as_ref(), &common::test_keyspace(), 10)
        .await
        .unwrap();
    assert_eq!(global.len(), 1);
    assert_eq!(global[0].id, trades[0].id);
}

#[tokio::test]
async fn test_ungated_trade_subscription_copies_unconditionally() {
    let h = harness();
    // No token_buy_count / watch_config: quota never applies.
    h.registry
        .add_subscription(common::make_subscription("U1", "K1", SubscriptionType::Trade))
        .await
        .unwrap();

    h.dispatcher.process_batch(vec![buy_tx("K1")]).await;
    h.dispatcher.process_batch(vec![buy_tx("K1")]).await;

    let messages = h.publisher.take().await;
    assert_eq!(
        messages.iter().filter(|m| m.routing_key == "copy.trade.request").count(),
        2,
        "no quota: every detected trade dispatches"
    );
}

#[tokio::test]
async fn test_blacklisted_token_notifies_without_copy() {
    let h = harness();
    let mut sub = common::make_subscription("U1", "K1", SubscriptionType::Trade);
    sub.safety = Some(SafetySettings {
        token_blacklist: Some(vec![TOKEN_MINT.into()]),
        ..Default::default()
    });
    h.registry.add_subscription(sub).await.unwrap();

    h.dispatcher.process_batch(vec![buy_tx("K1")]).await;

    let messages = h.publisher.take().await;
    assert_eq!(messages.iter().filter(|m| m.routing_key == "client.notification").count(), 1);
    assert_eq!(messages.iter().filter(|m| m.routing_key == "copy.trade.request").count(), 0);
}
