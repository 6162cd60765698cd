pub mod handlers;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use uuid::Uuid;

use crate::bus::{publish_json, BusTopology, EventPublisher, ROUTE_CLIENT_NOTIFICATION, ROUTE_COPY_TRADE_REQUEST, ROUTE_TRADE_DETECTED};
use crate::classifier;
use crate::models::webhook::TransactionKind;
use crate::models::{
    ClientNotification, CopyTradeBatch, CopyTradeOrder, EnhancedTransaction, Subscription, Trade,
    TradeDetectedEvent, WRAPPED_SOL_MINT,
};
use crate::quota::QuotaGate;
use crate::registry::KolRegistry;
use crate::scorer::ScorerClient;
use crate::store::{metrics_repo, trade_repo, Keyspace, Kv};
use crate::sync::StripedLock;

const KOL_LOCK_STRIPES: usize = 64;

/// Dispatcher tunables fixed at construction.
pub struct DispatcherConfig {
    /// TTL on trade detail keys and recent-trade indexes.
    pub trade_ttl: Option<Duration>,
    /// KOL wallets whose trades are sent to the ML scorer.
    pub predictable_kols: HashSet<String>,
}

#[derive(Default)]
struct Counters {
    transactions_processed: AtomicU64,
    trades_detected: AtomicU64,
    notifications_published: AtomicU64,
    copy_trades_dispatched: AtomicU64,
    quota_denied: AtomicU64,
}

/// The control plane: consumes webhook batches, classifies, gates,
/// fans out, and emits the three downstream streams.
///
/// Trades of the same KOL wallet serialize on a striped lock so they are
/// processed in arrival order; distinct KOLs proceed concurrently.
pub struct Dispatcher {
    kv: Arc<dyn Kv>,
    keys: Keyspace,
    registry: Arc<KolRegistry>,
    quota: Arc<QuotaGate>,
    publisher: Arc<dyn EventPublisher>,
    topology: BusTopology,
    scorer: Option<ScorerClient>,
    config: DispatcherConfig,
    kol_locks: StripedLock,
    counters: Counters,
    started_at: DateTime<Utc>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: Arc<dyn Kv>,
        keys: Keyspace,
        registry: Arc<KolRegistry>,
        quota: Arc<QuotaGate>,
        publisher: Arc<dyn EventPublisher>,
        topology: BusTopology,
        scorer: Option<ScorerClient>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            kv,
            keys,
            registry,
            quota,
            publisher,
            topology,
            scorer,
            config,
            kol_locks: StripedLock::new(KOL_LOCK_STRIPES),
            counters: Counters::default(),
            started_at: Utc::now(),
        }
    }

    /// Process one inbound webhook batch in arrival order. Individual
    /// transaction failures are logged and never abort the batch; the
    /// transport has already acked by the time this runs.
    pub async fn process_batch(&self, batch: Vec<EnhancedTransaction>) {
        if batch.is_empty() {
            return;
        }

        counter!("webhook_batches_total").increment(1);
        let start = Instant::now();

        for tx in &batch {
            if let Err(e) = self.process_transaction(tx).await {
                tracing::error!(signature = %tx.signature, error = %e, "Transaction processing failed");
            }
        }

        histogram!("dispatch_latency_seconds").record(start.elapsed().as_secs_f64());
        metrics_repo::save_current(self.kv.as_ref(), &self.keys, &self.snapshot()).await;
    }

    async fn process_transaction(&self, tx: &EnhancedTransaction) -> anyhow::Result<()> {
        self.counters.transactions_processed.fetch_add(1, Ordering::Relaxed);
        counter!("transactions_processed_total").increment(1);

        let active = self.registry.get_watched_kol_wallets().await;
        let Some(kol_wallet) = tx
            .mentioned_addresses()
            .find(|address| active.contains(*address))
            .map(str::to_string)
        else {
            tracing::debug!(signature = %tx.signature, "No watched KOL in transaction — dropping");
            return Ok(());
        };

        // Serialize per KOL: arrival order within one wallet is a contract.
        let _kol_guard = self.kol_locks.lock(&kol_wallet).await;

        if let TransactionKind::Other(kind) = tx.kind() {
            tracing::debug!(signature = %tx.signature, kind = %kind, "Non-swap transaction — dropping");
            return Ok(());
        }

        let Some(swap) = classifier::classify_swap(tx, Some(&kol_wallet)) else {
            tracing::debug!(signature = %tx.signature, kol_wallet = %kol_wallet, "Unclassifiable swap — dropping");
            return Ok(());
        };

        let timestamp = tx
            .timestamp
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        let trade = Trade {
            id: Uuid::new_v4(),
            kol_wallet: kol_wallet.clone(),
            signature: tx.signature.clone(),
            timestamp,
            side: swap.side,
            token_mint: swap.token_mint,
            quote_mint: WRAPPED_SOL_MINT.to_string(),
            token_amount: swap.token_amount,
            quote_amount: swap.quote_amount,
            dex: classifier::infer_dex_label(tx.source.as_deref(), tx.description.as_deref()),
            slot: tx.slot,
            fee: tx.fee,
        };

        tracing::info!(
            kol_wallet = %trade.kol_wallet,
            side = %trade.side,
            token_mint = %trade.token_mint,
            token_amount = %trade.token_amount,
            quote_amount = %trade.quote_amount,
            dex = %trade.dex,
            "KOL trade detected"
        );
        self.counters.trades_detected.fetch_add(1, Ordering::Relaxed);
        counter!("trades_detected_total").increment(1);
        metrics_repo::increment_counter(self.kv.as_ref(), &self.keys, "trades_detected").await;

        // History persistence is best-effort; fan-out proceeds regardless.
        if let Err(e) =
            trade_repo::persist_trade(self.kv.as_ref(), &self.keys, &trade, self.config.trade_ttl).await
        {
            tracing::warn!(trade_id = %trade.id, error = %e, "Trade persistence failed");
        }

        let subscriptions: Vec<Subscription> = self
            .registry
            .get_subscriptions_for_kol(&kol_wallet)
            .await
            .into_iter()
            .filter(|sub| sub.active)
            .collect();

        if subscriptions.is_empty() {
            tracing::debug!(kol_wallet = %kol_wallet, "No active subscribers — nothing to fan out");
            return Ok(());
        }

        let copy_orders = self.gate_copy_orders(&trade, &subscriptions).await;

        let prediction = self.score_if_predictable(&trade).await;

        self.emit_trade_detected(&trade, &subscriptions, copy_orders.len(), prediction).await;
        self.emit_notifications(&trade, &subscriptions).await;
        self.emit_copy_trade_batch(&trade, copy_orders).await;

        Ok(())
    }

    /// Select the subscriptions eligible for copy-trade dispatch: `trade`
    /// type, safety settings satisfied, and (when configured) one slot
    /// taken from the purchase quota. Skipped subscribers still get their
    /// notification.
    async fn gate_copy_orders(&self, trade: &Trade, subscriptions: &[Subscription]) -> Vec<CopyTradeOrder> {
        let mut orders = Vec::new();

        for sub in subscriptions {
            if sub.kind != crate::models::SubscriptionType::Trade {
                continue;
            }

            if !safety_allows(sub, trade) {
                tracing::info!(
                    user_id = %sub.user_id,
                    kol_wallet = %trade.kol_wallet,
                    "Safety settings exclude trade from copy dispatch"
                );
                continue;
            }

            if sub.is_quota_gated() {
                let max_count = sub.token_buy_count.unwrap_or(0);
                let result = self
                    .quota
                    .increment_and_validate(&sub.user_id, &trade.token_mint, max_count, sub.id)
                    .await;
                if !result.success {
                    self.counters.quota_denied.fetch_add(1, Ordering::Relaxed);
                    counter!("quota_denied_total").increment(1);
                    tracing::info!(
                        user_id = %sub.user_id,
                        token_mint = %trade.token_mint,
                        count = result.new_count,
                        max = max_count,
                        at_limit = result.was_at_limit,
                        "Purchase quota denied — notifying without copy trade"
                    );
                    continue;
                }
            }

            orders.push(CopyTradeOrder::from_subscription(trade, sub));
        }

        orders
    }

    async fn score_if_predictable(&self, trade: &Trade) -> f64 {
        let Some(scorer) = &self.scorer else {
            return 0.0;
        };
        if !self.config.predictable_kols.contains(&trade.kol_wallet) {
            return 0.0;
        }
        scorer.predict(&trade.token_mint, trade.timestamp).await
    }

    async fn emit_trade_detected(
        &self,
        trade: &Trade,
        subscriptions: &[Subscription],
        copy_count: usize,
        prediction: f64,
    ) {
        let event = TradeDetectedEvent {
            trade: trade.clone(),
            subscriptions: subscriptions.to_vec(),
            estimated_copy_count: copy_count,
            prediction,
        };
        if let Err(e) = publish_json(
            self.publisher.as_ref(),
            &self.topology.copy_trade_events_exchange(),
            ROUTE_TRADE_DETECTED,
            &event,
        )
        .await
        {
            tracing::error!(trade_id = %trade.id, error = %e, "Failed to publish trade-detected event");
        }
    }

    /// One notification per subscription. A failed publish skips that
    /// subscriber only; bus-level redelivery covers the rest.
    async fn emit_notifications(&self, trade: &Trade, subscriptions: &[Subscription]) {
        for sub in subscriptions {
            let notification = ClientNotification::trade_detected(trade, sub);
            match publish_json(
                self.publisher.as_ref(),
                &self.topology.notifications_exchange(),
                ROUTE_CLIENT_NOTIFICATION,
                &notification,
            )
            .await
            {
                Ok(()) => {
                    self.counters.notifications_published.fetch_add(1, Ordering::Relaxed);
                    counter!("notifications_published_total").increment(1);
                }
                Err(e) => {
                    tracing::error!(
                        user_id = %sub.user_id,
                        trade_id = %trade.id,
                        error = %e,
                        "Failed to publish notification"
                    );
                }
            }
        }
    }

    async fn emit_copy_trade_batch(&self, trade: &Trade, orders: Vec<CopyTradeOrder>) {
        if orders.is_empty() {
            return;
        }
        let count = orders.len();
        let batch = CopyTradeBatch {
            trade_id: trade.id,
            trades: orders,
        };
        match publish_json(
            self.publisher.as_ref(),
            &self.topology.copy_trade_events_exchange(),
            ROUTE_COPY_TRADE_REQUEST,
            &batch,
        )
        .await
        {
            Ok(()) => {
                self.counters.copy_trades_dispatched.fetch_add(count as u64, Ordering::Relaxed);
                counter!("copy_trades_dispatched_total").increment(count as u64);
                tracing::info!(trade_id = %trade.id, orders = count, "Copy-trade batch dispatched");
            }
            Err(e) => {
                tracing::error!(trade_id = %trade.id, error = %e, "Failed to publish copy-trade batch");
            }
        }
    }

    fn snapshot(&self) -> metrics_repo::ServiceMetrics {
        metrics_repo::ServiceMetrics {
            transactions_processed: self.counters.transactions_processed.load(Ordering::Relaxed),
            trades_detected: self.counters.trades_detected.load(Ordering::Relaxed),
            notifications_published: self.counters.notifications_published.load(Ordering::Relaxed),
            copy_trades_dispatched: self.counters.copy_trades_dispatched.load(Ordering::Relaxed),
            quota_denied: self.counters.quota_denied.load(Ordering::Relaxed),
            started_at: Some(self.started_at),
            updated_at: Some(Utc::now()),
        }
    }
}

/// Check a subscription's safety settings against a trade. Absent
/// settings allow everything.
fn safety_allows(sub: &Subscription, trade: &Trade) -> bool {
    let Some(safety) = &sub.safety else {
        return true;
    };

    if let Some(whitelist) = &safety.dex_whitelist {
        if !whitelist.iter().any(|dex| dex.eq_ignore_ascii_case(&trade.dex)) {
            return false;
        }
    }

    if let Some(blacklist) = &safety.token_blacklist {
        if blacklist.iter().any(|mint| mint == &trade.token_mint) {
            return false;
        }
    }

    if let Some(hours) = &safety.trading_hours {
        use chrono::Timelike;
        let hour = trade.timestamp.hour() as u8;
        let inside = if hours.start_hour <= hours.end_hour {
            hour >= hours.start_hour && hour < hours.end_hour
        } else {
            // Window wraps midnight.
            hour >= hours.start_hour || hour < hours.end_hour
        };
        if !inside {
            return false;
        }
    }

    true
}
