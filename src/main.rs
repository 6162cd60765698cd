use std::sync::Arc;

use chrono::Utc;
use lapin::options::BasicQosOptions;
use tokio_util::sync::CancellationToken;

use kolbot::api::router::create_router;
use kolbot::bus::{self, BusTopology, LapinPublisher, MessageHandler, RetryPolicy};
use kolbot::config::AppConfig;
use kolbot::dispatcher::handlers::{KolManagementHandler, ServiceCommandHandler, SubscriptionCommandHandler};
use kolbot::dispatcher::{Dispatcher, DispatcherConfig};
use kolbot::provider::{HeliusProvider, NoopProvider, WebhookProvider};
use kolbot::quota::QuotaGate;
use kolbot::registry::KolRegistry;
use kolbot::rpc::{self, RpcServer};
use kolbot::scorer::ScorerClient;
use kolbot::store::{Keyspace, Kv, RedisKv};
use kolbot::{metrics, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls CryptoProvider");

    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);

    // --- Prometheus metrics ---
    let metrics_handle = metrics::init_metrics();
    tracing::info!("Prometheus metrics initialized");

    // --- KV store ---
    tracing::info!("Connecting to KV store...");
    let kv: Arc<dyn Kv> = Arc::new(RedisKv::connect(&config.kv_url).await?);
    kv.ping().await?;
    tracing::info!("KV store connected");

    let keys = Keyspace::new(&config.environment);
    let topology = BusTopology::new(&config.environment);

    // --- Provider client ---
    let provider: Arc<dyn WebhookProvider> = if config.has_provider() {
        let client = HeliusProvider::new(
            config.helius_api_key.clone().unwrap(),
            config.helius_webhook_id.clone().unwrap(),
        );
        tracing::info!("Helius provider client initialized");
        Arc::new(client)
    } else {
        tracing::warn!("No provider credentials — running monitor-only, watch list won't sync");
        Arc::new(NoopProvider)
    };

    // --- Registry + quota gate ---
    let registry = Arc::new(KolRegistry::new(
        Arc::clone(&kv),
        Arc::clone(&provider),
        keys.clone(),
        config.registry_ttl(),
    ));
    let quota = Arc::new(QuotaGate::new(Arc::clone(&kv), keys.clone(), config.counter_ttl));

    // Reconcile the provider watch list against the active set at boot.
    if let Err(e) = registry.sync_with_provider().await {
        tracing::warn!(error = %e, "Startup provider sync failed — continuing");
    }

    // --- ML scorer ---
    let scorer = config.scorer_url.clone().map(|url| {
        tracing::info!(endpoint = %url, "Token scorer enabled");
        ScorerClient::new(url, config.scorer_timeout)
    });
    if scorer.is_none() {
        tracing::info!("Token scorer disabled (SCORER_URL not set)");
    }

    // --- Dispatcher ---
    let publisher = Arc::new(LapinPublisher::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&kv),
        keys.clone(),
        Arc::clone(&registry),
        Arc::clone(&quota),
        publisher.clone(),
        topology.clone(),
        scorer,
        DispatcherConfig {
            trade_ttl: Some(config.trade_history_ttl),
            predictable_kols: config.predictable_kol_wallets.clone(),
        },
    ));

    // --- Bus consumers under the reconnect supervisor ---
    let handlers: Vec<Arc<dyn MessageHandler>> = vec![
        Arc::new(SubscriptionCommandHandler::new(Arc::clone(&registry))),
        Arc::new(KolManagementHandler::new(Arc::clone(&provider))),
        Arc::new(ServiceCommandHandler::new(
            Arc::clone(&kv),
            keys.clone(),
            publisher.clone(),
            topology.clone(),
        )),
    ];
    let handlers = Arc::new(handlers);

    let rpc_server = Arc::new(RpcServer::new(
        Arc::clone(&registry),
        Arc::clone(&provider),
        Arc::clone(&kv),
        keys.clone(),
    ));

    let cancel = CancellationToken::new();
    let retry = RetryPolicy {
        max_attempts: config.retry_attempts,
        base_delay: config.retry_base_delay,
    };

    let mut bus_handle = {
        let bus_url = config.bus_url.clone();
        let topology = topology.clone();
        let publisher = publisher.clone();
        let cancel = cancel.clone();
        let prefetch = config.prefetch;
        let processing_timeout = config.processing_timeout;

        tokio::spawn(async move {
            bus::run_supervised(&bus_url, cancel.clone(), |consume_channel, publish_channel| {
                let topology = topology.clone();
                let publisher = publisher.clone();
                let handlers = Arc::clone(&handlers);
                let rpc_server = Arc::clone(&rpc_server);
                let cancel = cancel.clone();

                async move {
                    consume_channel
                        .basic_qos(prefetch, BasicQosOptions::default())
                        .await?;
                    bus::declare_topology(&consume_channel, &topology).await?;
                    publisher.set_channel(publish_channel).await;
                    tracing::info!("Bus topology declared");

                    let queues = topology.command_queues();
                    tokio::try_join!(
                        bus::consumer::run_queue_consumer(
                            consume_channel.clone(),
                            queues[0].clone(),
                            Arc::clone(&handlers),
                            retry,
                            processing_timeout,
                            cancel.clone(),
                        ),
                        bus::consumer::run_queue_consumer(
                            consume_channel.clone(),
                            queues[1].clone(),
                            Arc::clone(&handlers),
                            retry,
                            processing_timeout,
                            cancel.clone(),
                        ),
                        bus::consumer::run_queue_consumer(
                            consume_channel.clone(),
                            queues[2].clone(),
                            Arc::clone(&handlers),
                            retry,
                            processing_timeout,
                            cancel.clone(),
                        ),
                        rpc::run_rpc_consumer(
                            consume_channel.clone(),
                            topology.clone(),
                            rpc_server,
                            cancel.clone(),
                        ),
                    )?;
                    Ok(())
                }
            })
            .await
        })
    };

    // --- HTTP surface ---
    let state = AppState {
        kv,
        config,
        registry,
        dispatcher,
        metrics_handle,
        started_at: Utc::now(),
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(cancel.clone()));

    tokio::select! {
        result = server => {
            result?;
        }
        result = &mut bus_handle => {
            match result {
                Ok(Ok(())) => tracing::info!("Bus supervisor finished"),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Bus supervisor failed — shutting down");
                    cancel.cancel();
                    std::process::exit(1);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Bus supervisor panicked — shutting down");
                    cancel.cancel();
                    std::process::exit(1);
                }
            }
        }
    }

    cancel.cancel();
    // Give in-flight handlers a moment to release their messages.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), bus_handle).await;

    tracing::info!("Shutting down gracefully...");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown...");
    cancel.cancel();
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();
}
