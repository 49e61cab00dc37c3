use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use sns_trigger_service::{
    api::{AppState, run_api_server},
    clients::{
        build_queue::RedisBuildQueue,
        certificate::{CachingCertificateFetcher, HttpCertificateFetcher},
        health::HealthChecker,
        redis::RedisStoreProvider,
        subscription::SubscriptionClient,
    },
    config::Config,
    trigger::poller::TriggerPoller,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::load()?;

    let provider = Arc::new(RedisStoreProvider::connect(&config).await?);
    let queue = Arc::new(RedisBuildQueue::new(
        provider.connection(),
        provider.key_prefix(),
        config.retry_config(),
    ));

    let state = Arc::new(AppState {
        certificate_fetcher: Arc::new(CachingCertificateFetcher::with_capacity(
            Arc::new(HttpCertificateFetcher::new(&config)?),
            config.certificate_cache_size,
        )),
        subscription_client: SubscriptionClient::new(&config)?,
        store_provider: provider.clone(),
        health_checker: Some(HealthChecker::new(provider.connection())),
    });

    let poller = TriggerPoller::new(
        provider,
        queue,
        Duration::from_secs(config.trigger_poll_interval_seconds),
    );
    tokio::spawn(poller.run());

    info!("SNS trigger service is ready");

    run_api_server(&config, state).await
}
