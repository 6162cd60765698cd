use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::AppState;

pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    let watched = state.registry.get_watched_kol_wallets().await.len();
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "watchedKolWallets": watched,
        "uptimeSecs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let kv_ok = state.kv.ping().await.is_ok();

    if kv_ok {
        (StatusCode::OK, Json(json!({ "status": "healthy" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "kv": "disconnected" })),
        )
    }
}
