use std::sync::Arc;

use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::bus::BusTopology;
use crate::models::{RpcRequest, RpcResponse, Subscription};
use crate::provider::WebhookProvider;
use crate::registry::KolRegistry;
use crate::store::{trade_repo, Keyspace, Kv};

const DEFAULT_RECENT_LIMIT: usize = 20;
const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_RECENT_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserArgs {
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserKolArgs {
    user_id: String,
    kol_wallet: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KolArgs {
    kol_wallet: String,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct LimitArgs {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct AddressArgs {
    addresses: Vec<String>,
    address: Option<String>,
}

/// Synchronous request/reply surface over the RPC queue. Method dispatch
/// is pure with respect to the transport: `handle_request` is callable
/// from tests without a broker.
pub struct RpcServer {
    registry: Arc<KolRegistry>,
    provider: Arc<dyn WebhookProvider>,
    kv: Arc<dyn Kv>,
    keys: Keyspace,
}

impl RpcServer {
    pub fn new(
        registry: Arc<KolRegistry>,
        provider: Arc<dyn WebhookProvider>,
        kv: Arc<dyn Kv>,
        keys: Keyspace,
    ) -> Self {
        Self {
            registry,
            provider,
            kv,
            keys,
        }
    }

    pub async fn handle_request(&self, request: RpcRequest) -> RpcResponse {
        match request.method.as_str() {
            "createUserSubscription" => self.create_user_subscription(request.args).await,
            "removeUserSubscription" => self.remove_user_subscription(request.args).await,
            "addKolWalletToWebhook" => self.edit_webhook_addresses(request.args, true).await,
            "removeKolWalletFromWebhook" => self.edit_webhook_addresses(request.args, false).await,
            "getSubscriptionsForKOL" => self.get_subscriptions_for_kol(request.args).await,
            "getSubscriptionsForUser" => self.get_subscriptions_for_user(request.args).await,
            "getKolWallets" => self.get_kol_wallets().await,
            "getRecentKOLTrades" => self.get_recent_kol_trades(request.args).await,
            "getTradeHistory" => self.get_trade_history(request.args).await,
            "getKOLSwapTransactions" => self.get_kol_swap_transactions(request.args).await,
            _ => RpcResponse::invalid_method(),
        }
    }

    async fn create_user_subscription(&self, args: Value) -> RpcResponse {
        let sub: Subscription = match serde_json::from_value(args) {
            Ok(sub) => sub,
            Err(e) => return RpcResponse::error(format!("Invalid subscription: {e}")),
        };
        match self.registry.add_subscription(sub).await {
            Ok(subs) => RpcResponse::ok(json!(subs)),
            Err(e) => RpcResponse::error(format!("Failed to create subscription: {e}")),
        }
    }

    async fn remove_user_subscription(&self, args: Value) -> RpcResponse {
        let args: UserKolArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return RpcResponse::error(format!("Invalid arguments: {e}")),
        };
        match self
            .registry
            .remove_subscription(&args.user_id, &args.kol_wallet)
            .await
        {
            Ok(subs) => RpcResponse::ok(json!(subs)),
            Err(e) => RpcResponse::error(format!("Failed to remove subscription: {e}")),
        }
    }

    async fn edit_webhook_addresses(&self, args: Value, append: bool) -> RpcResponse {
        let args: AddressArgs = serde_json::from_value(args).unwrap_or_default();
        let mut addresses = args.addresses;
        if let Some(address) = args.address {
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        if addresses.is_empty() {
            return RpcResponse::error("No addresses given");
        }

        let result = if append {
            self.provider.append_addresses(&addresses).await
        } else {
            self.provider.remove_addresses(&addresses).await
        };

        match result {
            Ok(()) => RpcResponse::ok(json!({ "addresses": addresses })),
            Err(e) => RpcResponse::error(format!("Provider call failed: {e}")),
        }
    }

    async fn get_subscriptions_for_kol(&self, args: Value) -> RpcResponse {
        let args: KolArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return RpcResponse::error(format!("Invalid arguments: {e}")),
        };
        let subs = self.registry.get_subscriptions_for_kol(&args.kol_wallet).await;
        RpcResponse::ok(json!(subs))
    }

    async fn get_subscriptions_for_user(&self, args: Value) -> RpcResponse {
        let args: UserArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return RpcResponse::error(format!("Invalid arguments: {e}")),
        };
        let subs = self.registry.get_user_subscriptions(&args.user_id).await;
        RpcResponse::ok(json!(subs))
    }

    async fn get_kol_wallets(&self) -> RpcResponse {
        let mut wallets: Vec<String> = self.registry.get_watched_kol_wallets().await.into_iter().collect();
        wallets.sort();
        RpcResponse::ok(json!(wallets))
    }

    async fn get_recent_kol_trades(&self, args: Value) -> RpcResponse {
        let args: KolArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return RpcResponse::error(format!("Invalid arguments: {e}")),
        };
        let limit = args.limit.unwrap_or(DEFAULT_RECENT_LIMIT).min(MAX_RECENT_LIMIT);
        match trade_repo::recent_trades_for_kol(self.kv.as_ref(), &self.keys, &args.kol_wallet, limit).await
        {
            Ok(trades) => RpcResponse::ok(json!(trades)),
            Err(e) => {
                tracing::warn!(kol_wallet = %args.kol_wallet, error = %e, "Recent-trades read failed");
                RpcResponse::ok(json!([]))
            }
        }
    }

    async fn get_trade_history(&self, args: Value) -> RpcResponse {
        let args: LimitArgs = serde_json::from_value(args).unwrap_or_default();
        let limit = args.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
        match trade_repo::global_recent_trades(self.kv.as_ref(), &self.keys, limit).await {
            Ok(trades) => RpcResponse::ok(json!(trades)),
            Err(e) => {
                tracing::warn!(error = %e, "Trade-history read failed");
                RpcResponse::ok(json!([]))
            }
        }
    }

    async fn get_kol_swap_transactions(&self, args: Value) -> RpcResponse {
        let args: KolArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return RpcResponse::error(format!("Invalid arguments: {e}")),
        };
        let limit = args.limit.unwrap_or(MAX_RECENT_LIMIT).min(MAX_RECENT_LIMIT);
        match trade_repo::recent_trades_for_kol(self.kv.as_ref(), &self.keys, &args.kol_wallet, limit).await
        {
            Ok(trades) => RpcResponse::ok(json!(trades)),
            Err(e) => {
                tracing::warn!(kol_wallet = %args.kol_wallet, error = %e, "Swap-transactions read failed");
                RpcResponse::ok(json!([]))
            }
        }
    }
}

/// Consume the RPC queue until cancellation, posting each reply to the
/// caller-supplied `replyTo` queue with the matching `correlationId`.
/// Requests are always acked — an RPC is answered, never redelivered.
pub async fn run_rpc_consumer(
    channel: Channel,
    topology: BusTopology,
    server: Arc<RpcServer>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let queue = topology.rpc_queue();
    let mut consumer = channel
        .basic_consume(
            &queue,
            "kolbot-rpc",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    tracing::info!(queue = %queue, "RPC consumer started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("RPC consumer stopping");
                return Ok(());
            }
            delivery = consumer.next() => {
                let delivery = match delivery {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => anyhow::bail!("rpc consumer stream error: {e}"),
                    None => anyhow::bail!("rpc consumer stream closed"),
                };

                let response = match serde_json::from_slice::<RpcRequest>(&delivery.data) {
                    Ok(request) => {
                        tracing::debug!(method = %request.method, "RPC request received");
                        server.handle_request(request).await
                    }
                    Err(e) => RpcResponse::error(format!("Invalid request: {e}")),
                };

                let reply_to = delivery.properties.reply_to().clone();
                let correlation_id = delivery.properties.correlation_id().clone();

                if let Some(reply_to) = reply_to {
                    let mut properties = BasicProperties::default();
                    if let Some(correlation_id) = correlation_id {
                        properties = properties.with_correlation_id(correlation_id);
                    }
                    let payload = serde_json::to_vec(&response).unwrap_or_default();
                    let publish = async {
                        channel
                            .basic_publish(
                                "",
                                reply_to.as_str(),
                                BasicPublishOptions::default(),
                                &payload,
                                properties,
                            )
                            .await?
                            .await?;
                        Ok::<_, anyhow::Error>(())
                    }
                    .await;
                    if let Err(e) = publish {
                        tracing::error!(reply_to = %reply_to.as_str(), error = %e, "Failed to post RPC reply");
                    }
                } else {
                    tracing::warn!("RPC request without replyTo — dropping response");
                }

                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    tracing::error!(error = %e, "Failed to ack RPC request");
                }
            }
        }
    }
}
