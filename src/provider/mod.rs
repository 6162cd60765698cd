use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

const HELIUS_API_BASE: &str = "https://api.helius.xyz/v0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook {0} not found")]
    WebhookNotFound(String),
}

/// The slice of the blockchain-index provider the registry depends on:
/// keeping the watched-address list of one webhook in sync.
#[async_trait]
pub trait WebhookProvider: Send + Sync {
    async fn append_addresses(&self, addresses: &[String]) -> Result<(), ProviderError>;
    async fn remove_addresses(&self, addresses: &[String]) -> Result<(), ProviderError>;
    async fn watched_addresses(&self) -> Result<Vec<String>, ProviderError>;
}

/// One webhook registration as returned by the provider API.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderWebhook {
    #[serde(rename = "webhookID")]
    pub webhook_id: String,
    #[serde(rename = "webhookURL")]
    pub webhook_url: String,
    pub transaction_types: Vec<String>,
    pub account_addresses: Vec<String>,
    pub webhook_type: Option<String>,
}

/// Helius webhook-management client. Address edits are read-merge-write
/// against the webhook record, which is how the provider's own SDK does
/// it; concurrent edits are serialized by the registry lock upstream.
#[derive(Debug, Clone)]
pub struct HeliusProvider {
    http: Client,
    base_url: String,
    api_key: String,
    webhook_id: String,
}

impl HeliusProvider {
    pub fn new(api_key: String, webhook_id: String) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: HELIUS_API_BASE.into(),
            api_key,
            webhook_id,
        }
    }

    pub async fn get_all_webhooks(&self) -> Result<Vec<ProviderWebhook>, ProviderError> {
        let url = format!("{}/webhooks?api-key={}", self.base_url, self.api_key);
        let resp = self.http.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn create_webhook(
        &self,
        webhook_url: &str,
        addresses: &[String],
    ) -> Result<ProviderWebhook, ProviderError> {
        let url = format!("{}/webhooks?api-key={}", self.base_url, self.api_key);
        let body = json!({
            "webhookURL": webhook_url,
            "transactionTypes": ["SWAP"],
            "accountAddresses": addresses,
            "webhookType": "enhanced",
        });
        let resp = self.http.post(&url).json(&body).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn get_webhook(&self) -> Result<ProviderWebhook, ProviderError> {
        let url = format!(
            "{}/webhooks/{}?api-key={}",
            self.base_url, self.webhook_id, self.api_key
        );
        let resp = self.http.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::WebhookNotFound(self.webhook_id.clone()));
        }
        Ok(resp.error_for_status()?.json().await?)
    }

    async fn put_addresses(&self, webhook: &ProviderWebhook, addresses: Vec<String>) -> Result<(), ProviderError> {
        let url = format!(
            "{}/webhooks/{}?api-key={}",
            self.base_url, self.webhook_id, self.api_key
        );
        let body = json!({
            "webhookURL": webhook.webhook_url,
            "transactionTypes": webhook.transaction_types,
            "accountAddresses": addresses,
            "webhookType": webhook.webhook_type,
        });
        self.http.put(&url).json(&body).send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl WebhookProvider for HeliusProvider {
    async fn append_addresses(&self, addresses: &[String]) -> Result<(), ProviderError> {
        if addresses.is_empty() {
            return Ok(());
        }
        let webhook = self.get_webhook().await?;
        let mut merged = webhook.account_addresses.clone();
        for address in addresses {
            if !merged.contains(address) {
                merged.push(address.clone());
            }
        }
        if merged.len() == webhook.account_addresses.len() {
            return Ok(());
        }
        self.put_addresses(&webhook, merged).await
    }

    async fn remove_addresses(&self, addresses: &[String]) -> Result<(), ProviderError> {
        if addresses.is_empty() {
            return Ok(());
        }
        let webhook = self.get_webhook().await?;
        let remaining: Vec<String> = webhook
            .account_addresses
            .iter()
            .filter(|existing| !addresses.contains(existing))
            .cloned()
            .collect();
        if remaining.len() == webhook.account_addresses.len() {
            return Ok(());
        }
        self.put_addresses(&webhook, remaining).await
    }

    async fn watched_addresses(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.get_webhook().await?.account_addresses)
    }
}

/// Stand-in used when provider credentials are absent (monitor-only
/// deployments and tests): accepts every mutation, watches nothing.
#[derive(Debug, Default, Clone)]
pub struct NoopProvider;

#[async_trait]
impl WebhookProvider for NoopProvider {
    async fn append_addresses(&self, _addresses: &[String]) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn remove_addresses(&self, _addresses: &[String]) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn watched_addresses(&self) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}
