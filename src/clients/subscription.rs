use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use reqwest::Client;
use tracing::{debug, info};

use crate::{config::Config, models::retry::RetryConfig, utils::retry_with_backoff};

/// Confirms SNS subscriptions by visiting the `SubscribeURL` AWS hands out.
pub struct SubscriptionClient {
    http_client: Client,
    retry_config: RetryConfig,
}

impl SubscriptionClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.certificate_fetch_timeout_seconds))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!("Subscription client initialized");

        Ok(Self {
            http_client,
            retry_config: config.retry_config(),
        })
    }

    /// Confirms the subscription and returns its ARN.
    pub async fn confirm(&self, subscribe_url: &str) -> Result<String, Error> {
        debug!(subscribe_url, "Confirming SNS subscription");

        let body = retry_with_backoff(&self.retry_config, || {
            let client = self.http_client.clone();
            let url = subscribe_url.to_string();

            async move {
                let response = client.get(&url).send().await.map_err(|e| e.to_string())?;

                let status = response.status();
                if !status.is_success() {
                    return Err(format!("Subscription confirmation returned status {}", status));
                }

                response
                    .text()
                    .await
                    .map_err(|e| format!("Failed to read confirmation response: {}", e))
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to confirm subscription: {}", e))?;

        extract_subscription_arn(&body)
    }
}

/// Reads `ConfirmSubscriptionResult/SubscriptionArn` from a confirmation response.
pub fn extract_subscription_arn(xml: &str) -> Result<String, Error> {
    let document = roxmltree::Document::parse(xml)
        .map_err(|e| anyhow!("Subscription confirmation is not valid XML: {}", e))?;

    document
        .descendants()
        .filter(|node| node.has_tag_name("ConfirmSubscriptionResult"))
        .flat_map(|result| result.children())
        .find(|node| node.has_tag_name("SubscriptionArn"))
        .and_then(|node| node.text())
        .map(str::trim)
        .filter(|arn| !arn.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Subscription confirmation has no SubscriptionArn"))
}
