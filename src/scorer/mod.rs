use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Client for the external ML scoring service. The predictor is opaque:
/// token mint + event time in, probability out. Every call carries a hard
/// deadline and every failure scores as 0.0 — the scorer must never block
/// or break the dispatch pipeline.
#[derive(Debug, Clone)]
pub struct ScorerClient {
    http: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    probability: f64,
}

impl ScorerClient {
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        let http = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { http, endpoint }
    }

    pub async fn predict(&self, token_mint: &str, event_time: DateTime<Utc>) -> f64 {
        let body = json!({
            "tokenMint": token_mint,
            "timestamp": event_time.timestamp(),
        });

        let result = async {
            let resp = self
                .http
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            resp.json::<PredictResponse>().await
        }
        .await;

        match result {
            Ok(prediction) => prediction.probability,
            Err(e) => {
                tracing::debug!(token_mint = %token_mint, error = %e, "Scorer call failed — scoring 0");
                0.0
            }
        }
    }
}
