use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
///
/// Safe to call multiple times (e.g. in tests) — subsequent calls return a
/// new handle but silently ignore the global recorder installation error.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = match builder.install_recorder() {
        Ok(h) => h,
        Err(_) => {
            // Recorder already installed (happens in tests). Build a standalone
            // handle that still works for rendering.
            PrometheusBuilder::new().build_recorder().handle()
        }
    };

    // Pre-register counters so they appear even before the first increment.
    counter!("webhook_batches_total").absolute(0);
    counter!("transactions_processed_total").absolute(0);
    counter!("trades_detected_total").absolute(0);
    counter!("notifications_published_total").absolute(0);
    counter!("copy_trades_dispatched_total").absolute(0);
    counter!("quota_denied_total").absolute(0);
    counter!("bus_messages_retried_total").absolute(0);
    counter!("bus_messages_dead_lettered_total").absolute(0);

    gauge!("active_kol_wallets").set(0.0);

    // Histogram is lazily created on first record; force creation.
    histogram!("dispatch_latency_seconds").record(0.0);

    handle
}
