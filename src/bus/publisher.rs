use std::time::Duration;

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

/// Deadline on every outbound publish.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound side of the bus. The dispatcher and command handlers publish
/// through this seam; tests capture through [`MemoryPublisher`].
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> anyhow::Result<()>;
}

/// Serialize and publish in one step.
pub async fn publish_json<T: Serialize>(
    publisher: &dyn EventPublisher,
    exchange: &str,
    routing_key: &str,
    message: &T,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(message)?;
    publisher.publish(exchange, routing_key, &payload).await
}

/// Publisher over a live broker channel. The channel slot is refreshed by
/// the connection supervisor on every reconnect; publishes between
/// connections fail fast and are handled by the caller's partial-failure
/// policy.
#[derive(Default)]
pub struct LapinPublisher {
    channel: RwLock<Option<Channel>>,
}

impl LapinPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_channel(&self, channel: Channel) {
        *self.channel.write().await = Some(channel);
    }
}

#[async_trait]
impl EventPublisher for LapinPublisher {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> anyhow::Result<()> {
        let channel = {
            let guard = self.channel.read().await;
            guard.clone()
        };
        let Some(channel) = channel else {
            anyhow::bail!("bus publisher has no live channel");
        };

        let publish = async {
            channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    payload,
                    BasicProperties::default().with_delivery_mode(2),
                )
                .await?
                .await?;
            Ok::<_, anyhow::Error>(())
        };

        match tokio::time::timeout(PUBLISH_TIMEOUT, publish).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("publish to {exchange}/{routing_key} exceeded {PUBLISH_TIMEOUT:?}"),
        }
    }
}

/// One captured publish, decoded for assertions.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: serde_json::Value,
}

/// In-process capture sink used by the test suite.
#[derive(Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn take(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut *self.messages.lock().await)
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> anyhow::Result<()> {
        let payload = serde_json::from_slice(payload).unwrap_or(serde_json::Value::Null);
        self.messages.lock().await.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
        });
        Ok(())
    }
}
