mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use kolbot::models::{RpcRequest, Trade, TradeSide, WRAPPED_SOL_MINT};
use kolbot::registry::KolRegistry;
use kolbot::rpc::RpcServer;
use kolbot::store::trade_repo;

use common::RecordingProvider;

fn server(kv: Arc<kolbot::store::MemoryKv>, provider: Arc<RecordingProvider>) -> RpcServer {
    let keys = common::test_keyspace();
    let registry = Arc::new(KolRegistry::new(
        kv.clone(),
        Arc::clone(&provider) as Arc<dyn kolbot::provider::WebhookProvider>,
        keys.clone(),
        None,
    ));
    RpcServer::new(registry, provider, kv, keys)
}

fn request(method: &str, args: Value) -> RpcRequest {
    RpcRequest {
        method: method.into(),
        args,
    }
}

#[tokio::test]
async fn test_unknown_method_is_rejected() {
    let server = server(common::test_kv(), Arc::new(RecordingProvider::new()));

    let response = server.handle_request(request("selfDestruct", json!({}))).await;
    assert!(!response.success);
    assert_eq!(response.message, "Invalid method");
    assert_eq!(response.data, Value::Null);
}

#[tokio::test]
async fn test_subscription_round_trip() {
    let server = server(common::test_kv(), Arc::new(RecordingProvider::new()));

    let created = server
        .handle_request(request(
            "createUserSubscription",
            json!({
                "userId": "U1",
                "kolWallet": "K1",
                "walletAddress": "Addr1",
                "privateKey": "opaque",
                "type": "trade",
                "copyPercentage": "25",
            }),
        ))
        .await;
    assert!(created.success, "{}", created.message);
    let subs = created.data.as_array().unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0]["kolWallet"], "K1");

    let listed = server
        .handle_request(request("getSubscriptionsForUser", json!({ "userId": "U1" })))
        .await;
    assert_eq!(listed.data.as_array().unwrap().len(), 1);

    let wallets = server.handle_request(request("getKolWallets", json!({}))).await;
    assert_eq!(wallets.data, json!(["K1"]));

    let for_kol = server
        .handle_request(request("getSubscriptionsForKOL", json!({ "kolWallet": "K1" })))
        .await;
    assert_eq!(for_kol.data.as_array().unwrap().len(), 1);

    let removed = server
        .handle_request(request(
            "removeUserSubscription",
            json!({ "userId": "U1", "kolWallet": "K1" }),
        ))
        .await;
    assert!(removed.success);
    assert!(removed.data.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_with_malformed_args_fails_structured() {
    let server = server(common::test_kv(), Arc::new(RecordingProvider::new()));

    let response = server
        .handle_request(request("createUserSubscription", json!({ "userId": 42 })))
        .await;
    assert!(!response.success);
    assert!(response.message.starts_with("Invalid subscription"));
    assert_eq!(response.data, Value::Null);
}

#[tokio::test]
async fn test_webhook_address_edits_reach_provider() {
    let provider = Arc::new(RecordingProvider::new());
    let server = server(common::test_kv(), Arc::clone(&provider));

    let added = server
        .handle_request(request("addKolWalletToWebhook", json!({ "addresses": ["K1", "K2"] })))
        .await;
    assert!(added.success);
    assert_eq!(provider.appended().await, vec!["K1".to_string(), "K2".to_string()]);

    let removed = server
        .handle_request(request("removeKolWalletFromWebhook", json!({ "address": "K1" })))
        .await;
    assert!(removed.success);
    assert_eq!(provider.removed().await, vec!["K1".to_string()]);
}

#[tokio::test]
async fn test_trade_reads() {
    let kv = common::test_kv();
    let keys = common::test_keyspace();
    let server = server(kv.clone(), Arc::new(RecordingProvider::new()));

    let empty = server
        .handle_request(request("getRecentKOLTrades", json!({ "kolWallet": "K1" })))
        .await;
    assert!(empty.success);
    assert!(empty.data.as_array().unwrap().is_empty());

    for i in 0..3i64 {
        let trade = Trade {
            id: Uuid::new_v4(),
            kol_wallet: "K1".into(),
            signature: format!("sig-{i}"),
            timestamp: Utc::now() + chrono::Duration::seconds(i),
            side: TradeSide::Buy,
            token_mint: "M".into(),
            quote_mint: WRAPPED_SOL_MINT.into(),
            token_amount: Decimal::from(100 + i),
            quote_amount: Decimal::ONE,
            dex: "Jupiter".into(),
            slot: None,
            fee: None,
        };
        trade_repo::persist_trade(kv.as_ref(), &keys, &trade, Some(Duration::from_secs(600)))
            .await
            .unwrap();
    }

    let recent = server
        .handle_request(request("getRecentKOLTrades", json!({ "kolWallet": "K1", "limit": 2 })))
        .await;
    let trades = recent.data.as_array().unwrap();
    assert_eq!(trades.len(), 2);
    // Newest first.
    assert_eq!(trades[0]["signature"], "sig-2");

    let history = server.handle_request(request("getTradeHistory", json!({}))).await;
    assert_eq!(history.data.as_array().unwrap().len(), 3);

    let swaps = server
        .handle_request(request("getKOLSwapTransactions", json!({ "kolWallet": "K1" })))
        .await;
    assert_eq!(swaps.data.as_array().unwrap().len(), 3);
}
