use axum::extract::State;
use axum::response::IntoResponse;

use crate::AppState;

/// Prometheus scrape endpoint.
pub async fn scrape(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}
