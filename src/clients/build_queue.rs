use anyhow::{Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::info;

use crate::{
    models::retry::RetryConfig,
    trigger::policy::{BuildQueue, BuildRequest},
    utils::retry_with_backoff,
};

/// Publishes build requests as JSON onto a Redis list the build system drains.
pub struct RedisBuildQueue {
    connection: MultiplexedConnection,
    queue_key: String,
    retry_config: RetryConfig,
}

impl RedisBuildQueue {
    pub fn new(connection: MultiplexedConnection, prefix: &str, retry_config: RetryConfig) -> Self {
        Self {
            connection,
            queue_key: format!("{}:build-queue", prefix),
            retry_config,
        }
    }
}

#[async_trait]
impl BuildQueue for RedisBuildQueue {
    async fn enqueue(&self, request: BuildRequest) -> Result<()> {
        let payload = serde_json::to_string(&request)?;

        retry_with_backoff(&self.retry_config, || {
            let mut conn = self.connection.clone();
            let key = self.queue_key.clone();
            let payload = payload.clone();

            async move {
                conn.lpush::<_, _, ()>(&key, payload)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to enqueue build: {}", e))?;

        info!(
            trigger = %request.trigger,
            queue = %self.queue_key,
            "Build request enqueued"
        );

        Ok(())
    }
}
