use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::bus::{publish_json, BusTopology, EventPublisher, MessageHandler, ROUTE_SERVICE_STATUS};
use crate::models::Subscription;
use crate::provider::WebhookProvider;
use crate::registry::KolRegistry;
use crate::store::{metrics_repo, Keyspace, Kv};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserKolArgs {
    user_id: String,
    kol_wallet: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct AddressArgs {
    addresses: Vec<String>,
    address: Option<String>,
}

impl AddressArgs {
    fn into_addresses(self) -> Vec<String> {
        let mut addresses = self.addresses;
        if let Some(address) = self.address {
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        addresses
    }
}

/// `subscription.*` commands: create/remove user subscriptions.
pub struct SubscriptionCommandHandler {
    registry: Arc<KolRegistry>,
}

impl SubscriptionCommandHandler {
    pub fn new(registry: Arc<KolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MessageHandler for SubscriptionCommandHandler {
    fn name(&self) -> &'static str {
        "subscription_commands"
    }

    fn can_handle(&self, routing_key: &str, _payload: &Value) -> bool {
        routing_key.starts_with("subscription.")
    }

    async fn handle(&self, routing_key: &str, payload: Value) -> anyhow::Result<()> {
        match routing_key {
            "subscription.create" => {
                let sub: Subscription = match serde_json::from_value(payload) {
                    Ok(sub) => sub,
                    Err(e) => {
                        // Validation failure: ack, do not retry.
                        tracing::warn!(error = %e, "Dropping malformed subscription.create");
                        return Ok(());
                    }
                };
                let user_id = sub.user_id.clone();
                let subs = self.registry.add_subscription(sub).await?;
                tracing::info!(user_id = %user_id, total = subs.len(), "Subscription created via bus");
                Ok(())
            }
            "subscription.remove" => {
                let args: UserKolArgs = match serde_json::from_value(payload) {
                    Ok(args) => args,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping malformed subscription.remove");
                        return Ok(());
                    }
                };
                let subs = self
                    .registry
                    .remove_subscription(&args.user_id, &args.kol_wallet)
                    .await?;
                tracing::info!(user_id = %args.user_id, remaining = subs.len(), "Subscription removed via bus");
                Ok(())
            }
            other => {
                tracing::warn!(routing_key = %other, "Unknown subscription command — acking");
                Ok(())
            }
        }
    }
}

/// `kol.*` commands: direct edits of the provider watch list.
pub struct KolManagementHandler {
    provider: Arc<dyn WebhookProvider>,
}

impl KolManagementHandler {
    pub fn new(provider: Arc<dyn WebhookProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl MessageHandler for KolManagementHandler {
    fn name(&self) -> &'static str {
        "kol_management"
    }

    fn can_handle(&self, routing_key: &str, _payload: &Value) -> bool {
        routing_key.starts_with("kol.")
    }

    async fn handle(&self, routing_key: &str, payload: Value) -> anyhow::Result<()> {
        let args: AddressArgs = serde_json::from_value(payload).unwrap_or_default();
        let addresses = args.into_addresses();
        if addresses.is_empty() {
            tracing::warn!(routing_key = %routing_key, "KOL command without addresses — acking");
            return Ok(());
        }

        match routing_key {
            "kol.add" => {
                self.provider.append_addresses(&addresses).await?;
                tracing::info!(count = addresses.len(), "KOL wallets appended to provider webhook");
                Ok(())
            }
            "kol.remove" => {
                self.provider.remove_addresses(&addresses).await?;
                tracing::info!(count = addresses.len(), "KOL wallets removed from provider webhook");
                Ok(())
            }
            other => {
                tracing::warn!(routing_key = %other, "Unknown KOL command — acking");
                Ok(())
            }
        }
    }
}

/// `service.*` commands: liveness and status reporting.
pub struct ServiceCommandHandler {
    kv: Arc<dyn Kv>,
    keys: Keyspace,
    publisher: Arc<dyn EventPublisher>,
    topology: BusTopology,
    started_at: DateTime<Utc>,
}

impl ServiceCommandHandler {
    pub fn new(
        kv: Arc<dyn Kv>,
        keys: Keyspace,
        publisher: Arc<dyn EventPublisher>,
        topology: BusTopology,
    ) -> Self {
        Self {
            kv,
            keys,
            publisher,
            topology,
            started_at: Utc::now(),
        }
    }
}

#[async_trait]
impl MessageHandler for ServiceCommandHandler {
    fn name(&self) -> &'static str {
        "service_commands"
    }

    fn can_handle(&self, routing_key: &str, _payload: &Value) -> bool {
        routing_key.starts_with("service.")
    }

    async fn handle(&self, routing_key: &str, _payload: Value) -> anyhow::Result<()> {
        match routing_key {
            "service.status" => {
                let metrics = metrics_repo::load_current(self.kv.as_ref(), &self.keys)
                    .await
                    .unwrap_or_default();
                let status = serde_json::json!({
                    "service": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                    "startedAt": self.started_at,
                    "uptimeSecs": (Utc::now() - self.started_at).num_seconds(),
                    "metrics": metrics,
                });
                publish_json(
                    self.publisher.as_ref(),
                    &self.topology.notifications_exchange(),
                    ROUTE_SERVICE_STATUS,
                    &status,
                )
                .await?;
                Ok(())
            }
            "service.ping" => {
                tracing::info!("Service ping received");
                Ok(())
            }
            other => {
                tracing::warn!(routing_key = %other, "Unknown service command — acking");
                Ok(())
            }
        }
    }
}
