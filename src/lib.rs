pub mod api;
pub mod bus;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod quota;
pub mod registry;
pub mod rpc;
pub mod scorer;
pub mod store;
pub mod sync;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::registry::KolRegistry;
use crate::store::Kv;

#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<dyn Kv>,
    pub config: AppConfig,
    pub registry: Arc<KolRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    pub started_at: DateTime<Utc>,
}
