use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel};
use serde_json::Value;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Header carrying the redelivery generation of a message.
const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// A consumer capability. The first registered handler whose `can_handle`
/// returns true gets the message; a message no handler claims is acked
/// with a warning so it cannot loop as a poison pill.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_handle(&self, routing_key: &str, payload: &Value) -> bool;
    async fn handle(&self, routing_key: &str, payload: Value) -> anyhow::Result<()>;
}

/// Exponential-backoff redelivery policy: failed deliveries are
/// republished to their original (exchange, routing key) after
/// `base_delay × 2^retry_count`, and dead-lettered once `max_attempts`
/// generations are exhausted.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry_count)
    }
}

/// Consume one queue until cancellation. Returns Err when the stream dies
/// underneath us, which sends the supervisor into its reconnect loop.
pub async fn run_queue_consumer(
    channel: Channel,
    queue: String,
    handlers: Arc<Vec<Arc<dyn MessageHandler>>>,
    retry: RetryPolicy,
    processing_timeout: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut consumer = channel
        .basic_consume(
            &queue,
            &format!("kolbot-{queue}"),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    tracing::info!(queue = %queue, "Consumer started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(queue = %queue, "Consumer stopping");
                return Ok(());
            }
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        handle_delivery(&channel, &queue, delivery, &handlers, retry, processing_timeout).await;
                    }
                    Some(Err(e)) => {
                        anyhow::bail!("consumer stream error on {queue}: {e}");
                    }
                    None => {
                        anyhow::bail!("consumer stream on {queue} closed");
                    }
                }
            }
        }
    }
}

async fn handle_delivery(
    channel: &Channel,
    queue: &str,
    delivery: Delivery,
    handlers: &[Arc<dyn MessageHandler>],
    retry: RetryPolicy,
    processing_timeout: Duration,
) {
    let routing_key = delivery.routing_key.as_str().to_string();

    // Malformed payloads are a validation failure: ack, never retry.
    let payload: Value = match serde_json::from_slice(&delivery.data) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(queue = %queue, routing_key = %routing_key, error = %e, "Dropping undecodable message");
            ack(&delivery).await;
            return;
        }
    };

    let Some(handler) = handlers.iter().find(|h| h.can_handle(&routing_key, &payload)) else {
        tracing::warn!(queue = %queue, routing_key = %routing_key, "No handler matched — acking");
        ack(&delivery).await;
        return;
    };

    let outcome = tokio::time::timeout(processing_timeout, handler.handle(&routing_key, payload)).await;

    match outcome {
        Ok(Ok(())) => {
            ack(&delivery).await;
        }
        Ok(Err(e)) => {
            tracing::error!(
                queue = %queue,
                routing_key = %routing_key,
                handler = handler.name(),
                error = %e,
                "Handler failed"
            );
            retry_or_dead_letter(channel, queue, delivery, retry).await;
        }
        Err(_) => {
            tracing::error!(
                queue = %queue,
                routing_key = %routing_key,
                handler = handler.name(),
                timeout_secs = processing_timeout.as_secs(),
                "Handler timed out"
            );
            retry_or_dead_letter(channel, queue, delivery, retry).await;
        }
    }
}

/// Failure path: republish with an incremented retry header after the
/// backoff delay, or nack without requeue so the broker dead-letters the
/// message once retries are exhausted.
async fn retry_or_dead_letter(channel: &Channel, queue: &str, delivery: Delivery, retry: RetryPolicy) {
    let retry_count = retry_count_of(&delivery.properties);

    if retry_count >= retry.max_attempts {
        tracing::warn!(
            queue = %queue,
            routing_key = %delivery.routing_key.as_str(),
            retry_count,
            "Retries exhausted — dead-lettering"
        );
        metrics::counter!("bus_messages_dead_lettered_total").increment(1);
        if let Err(e) = delivery
            .nack(BasicNackOptions {
                requeue: false,
                ..Default::default()
            })
            .await
        {
            tracing::error!(error = %e, "Failed to nack message");
        }
        return;
    }

    let delay = retry.delay_for(retry_count);
    let exchange = delivery.exchange.as_str().to_string();
    let routing_key = delivery.routing_key.as_str().to_string();
    let payload = delivery.data.clone();
    let republish_channel = channel.clone();

    metrics::counter!("bus_messages_retried_total").increment(1);
    tracing::info!(
        queue = %queue,
        routing_key = %routing_key,
        retry_count = retry_count + 1,
        delay_ms = delay.as_millis() as u64,
        "Scheduling redelivery"
    );

    tokio::spawn(async move {
        sleep(delay).await;

        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongInt((retry_count + 1) as i32));
        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_headers(headers);

        let result = async {
            republish_channel
                .basic_publish(&exchange, &routing_key, BasicPublishOptions::default(), &payload, properties)
                .await?
                .await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                routing_key = %routing_key,
                error = %e,
                "Failed to republish for retry — message lost until source retries"
            );
        }
    });

    // The copy is scheduled; release the original.
    ack(&delivery).await;
}

async fn ack(delivery: &Delivery) {
    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        tracing::error!(error = %e, "Failed to ack message");
    }
}

fn retry_count_of(properties: &BasicProperties) -> u32 {
    let Some(headers) = properties.headers() else {
        return 0;
    };
    let value = headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
        .map(|(_, value)| value);
    match value {
        Some(AMQPValue::LongInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::LongLongInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::ShortInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::ShortShortInt(v)) => (*v).max(0) as u32,
        _ => 0,
    }
}
