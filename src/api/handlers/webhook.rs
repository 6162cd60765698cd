use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::EnhancedTransaction;
use crate::AppState;

/// `POST /helius-webhook` — receipt acknowledgement only. The batch is
/// handed to the dispatcher on a spawned task and 200 goes back before
/// any processing happens; the provider retries on its own schedule and
/// must never see downstream latency or failures.
pub async fn receive(
    State(state): State<AppState>,
    Json(batch): Json<Vec<EnhancedTransaction>>,
) -> Result<Json<Value>, AppError> {
    let count = batch.len();
    tracing::info!(transactions = count, "Webhook batch received");

    if count > 0 {
        let dispatcher = state.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.process_batch(batch).await;
        });
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("Received {count} transaction(s)"),
        "timestamp": Utc::now(),
    })))
}
