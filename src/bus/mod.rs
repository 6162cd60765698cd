pub mod consumer;
pub mod publisher;

pub use consumer::{MessageHandler, RetryPolicy};
pub use publisher::{publish_json, EventPublisher, LapinPublisher, MemoryPublisher};

use std::time::Duration;

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub const EXCHANGE_COMMANDS: &str = "commands";
pub const EXCHANGE_COPY_TRADE_EVENTS: &str = "copy_trade_events";
pub const EXCHANGE_NOTIFICATIONS: &str = "notifications";
pub const EXCHANGE_DEAD_LETTER: &str = "dead_letter";

pub const ROUTE_TRADE_DETECTED: &str = "kol.trade.detected";
pub const ROUTE_COPY_TRADE_REQUEST: &str = "copy.trade.request";
pub const ROUTE_CLIENT_NOTIFICATION: &str = "client.notification";
pub const ROUTE_SERVICE_STATUS: &str = "service.status";
pub const ROUTE_DEAD_LETTER: &str = "failed";

pub const QUEUE_SUBSCRIPTION_COMMANDS: &str = "subscription_commands";
pub const QUEUE_KOL_MANAGEMENT: &str = "kol_management";
pub const QUEUE_SERVICE_COMMANDS: &str = "service_commands";
pub const QUEUE_TRADE_DETECTED: &str = "kol_trade_detected";
pub const QUEUE_COPY_TRADE_REQUESTS: &str = "copy_trade_requests";
pub const QUEUE_COPY_TRADE_COMPLETED: &str = "copy_trade_completed";
pub const QUEUE_CLIENT_NOTIFICATIONS: &str = "client_notifications";
pub const QUEUE_SERVICE_STATUS: &str = "service_status";
pub const QUEUE_DEAD_LETTER: &str = "dead_letter";
pub const QUEUE_RPC: &str = "copy_trader_rpc_queue";

/// Per-message TTL on every non-DLQ queue.
const MESSAGE_TTL_MS: i64 = 3_600_000;

const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Exchange/queue naming. Outside production every name is prefixed with
/// `{environment}_` so one broker can host several deployments.
#[derive(Debug, Clone)]
pub struct BusTopology {
    prefix: String,
}

impl BusTopology {
    pub fn new(environment: &str) -> Self {
        let prefix = if environment == "production" {
            String::new()
        } else {
            format!("{environment}_")
        };
        Self { prefix }
    }

    pub fn name(&self, base: &str) -> String {
        format!("{}{base}", self.prefix)
    }

    pub fn commands_exchange(&self) -> String {
        self.name(EXCHANGE_COMMANDS)
    }

    pub fn copy_trade_events_exchange(&self) -> String {
        self.name(EXCHANGE_COPY_TRADE_EVENTS)
    }

    pub fn notifications_exchange(&self) -> String {
        self.name(EXCHANGE_NOTIFICATIONS)
    }

    pub fn dead_letter_exchange(&self) -> String {
        self.name(EXCHANGE_DEAD_LETTER)
    }

    pub fn rpc_queue(&self) -> String {
        self.name(QUEUE_RPC)
    }

    /// Durable queues bound to the topic exchanges: (queue, exchange, pattern).
    pub fn bindings(&self) -> Vec<(String, String, &'static str)> {
        vec![
            (self.name(QUEUE_SUBSCRIPTION_COMMANDS), self.commands_exchange(), "subscription.*"),
            (self.name(QUEUE_KOL_MANAGEMENT), self.commands_exchange(), "kol.*"),
            (self.name(QUEUE_SERVICE_COMMANDS), self.commands_exchange(), "service.*"),
            (self.name(QUEUE_TRADE_DETECTED), self.copy_trade_events_exchange(), ROUTE_TRADE_DETECTED),
            (self.name(QUEUE_COPY_TRADE_REQUESTS), self.copy_trade_events_exchange(), ROUTE_COPY_TRADE_REQUEST),
            (self.name(QUEUE_COPY_TRADE_COMPLETED), self.copy_trade_events_exchange(), "copy.trade.completed"),
            (self.name(QUEUE_CLIENT_NOTIFICATIONS), self.notifications_exchange(), ROUTE_CLIENT_NOTIFICATION),
            (self.name(QUEUE_SERVICE_STATUS), self.notifications_exchange(), ROUTE_SERVICE_STATUS),
        ]
    }

    /// The queues this process consumes from (inbound command traffic).
    pub fn command_queues(&self) -> Vec<String> {
        vec![
            self.name(QUEUE_SUBSCRIPTION_COMMANDS),
            self.name(QUEUE_KOL_MANAGEMENT),
            self.name(QUEUE_SERVICE_COMMANDS),
        ]
    }
}

/// Declare the full exchange/queue/binding topology on a channel.
/// Idempotent; safe to run on every (re)connect.
pub async fn declare_topology(channel: &Channel, topology: &BusTopology) -> anyhow::Result<()> {
    let durable_topic = ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    };

    for exchange in [
        topology.commands_exchange(),
        topology.copy_trade_events_exchange(),
        topology.notifications_exchange(),
        topology.dead_letter_exchange(),
    ] {
        channel
            .exchange_declare(&exchange, ExchangeKind::Topic, durable_topic, FieldTable::default())
            .await?;
    }

    // Dead-letter queue first: a catch-all sink with no DLQ of its own.
    let dlq = topology.name(QUEUE_DEAD_LETTER);
    channel
        .queue_declare(
            &dlq,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            &dlq,
            &topology.dead_letter_exchange(),
            "#",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    for (queue, exchange, pattern) in topology.bindings() {
        channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                dead_letter_args(topology),
            )
            .await?;
        channel
            .queue_bind(&queue, &exchange, pattern, QueueBindOptions::default(), FieldTable::default())
            .await?;
    }

    // RPC queue: non-durable, served via the default exchange.
    channel
        .queue_declare(
            &topology.rpc_queue(),
            QueueDeclareOptions {
                durable: false,
                ..Default::default()
            },
            dead_letter_args(topology),
        )
        .await?;

    Ok(())
}

fn dead_letter_args(topology: &BusTopology) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(topology.dead_letter_exchange().into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(ROUTE_DEAD_LETTER.into()),
    );
    args.insert("x-message-ttl".into(), AMQPValue::LongInt(MESSAGE_TTL_MS as i32));
    args
}

/// Backoff for connection attempt `attempt` (1-based).
fn reconnect_delay(attempt: u32) -> Duration {
    let delay = BASE_RECONNECT_DELAY * 2u32.saturating_pow(attempt.saturating_sub(1));
    delay.min(MAX_RECONNECT_DELAY)
}

/// Own the broker connection for the life of the process: connect, hand a
/// fresh channel pair to `serve`, and reconnect with exponential backoff
/// whenever the consumers die. After ten straight failed attempts the
/// error is returned and the process terminates.
///
/// `serve` receives (consumer_channel, publisher_channel) and must run
/// until cancellation (Ok) or connection failure (Err).
pub async fn run_supervised<F, Fut>(
    url: &str,
    cancel: CancellationToken,
    mut serve: F,
) -> anyhow::Result<()>
where
    F: FnMut(Channel, Channel) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        match Connection::connect(url, ConnectionProperties::default()).await {
            Ok(connection) => match channel_pair(&connection).await {
                Ok((consume, publish)) => {
                    tracing::info!("Bus connected");
                    attempt = 0;
                    match serve(consume, publish).await {
                        Ok(()) => return Ok(()),
                        Err(e) => {
                            tracing::error!(error = %e, "Bus consumers stopped — reconnecting");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to open bus channels");
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "Bus connection failed");
            }
        }

        attempt = attempt.saturating_add(1);
        if attempt > MAX_RECONNECT_ATTEMPTS {
            anyhow::bail!("bus unreachable after {MAX_RECONNECT_ATTEMPTS} reconnect attempts");
        }

        let delay = reconnect_delay(attempt);
        tracing::warn!(delay_secs = delay.as_secs(), attempt, "Reconnecting to bus...");
        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

async fn channel_pair(connection: &Connection) -> anyhow::Result<(Channel, Channel)> {
    let consume = connection.create_channel().await?;
    let publish = connection.create_channel().await?;
    Ok((consume, publish))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_names_are_unprefixed() {
        let topology = BusTopology::new("production");
        assert_eq!(topology.commands_exchange(), "commands");
        assert_eq!(topology.rpc_queue(), "copy_trader_rpc_queue");
    }

    #[test]
    fn test_non_production_names_are_prefixed() {
        let topology = BusTopology::new("staging");
        assert_eq!(topology.dead_letter_exchange(), "staging_dead_letter");
        assert_eq!(topology.name(QUEUE_CLIENT_NOTIFICATIONS), "staging_client_notifications");
    }

    #[test]
    fn test_bindings_cover_all_consumer_queues() {
        let topology = BusTopology::new("production");
        let bindings = topology.bindings();
        assert_eq!(bindings.len(), 8);
        assert!(bindings
            .iter()
            .any(|(q, e, p)| q == "subscription_commands" && e == "commands" && *p == "subscription.*"));
        assert!(bindings
            .iter()
            .any(|(q, e, p)| q == "client_notifications" && e == "notifications" && *p == "client.notification"));
    }

    #[test]
    fn test_reconnect_delay_doubles_and_caps() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(reconnect_delay(5), Duration::from_secs(16));
        assert_eq!(reconnect_delay(8), Duration::from_secs(30));
    }
}
