use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::retry::RetryConfig;

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub redis_url: String,

    #[serde(default = "default_store_key_prefix")]
    pub store_key_prefix: String,

    #[serde(default = "default_certificate_fetch_timeout_seconds")]
    pub certificate_fetch_timeout_seconds: u64,

    #[serde(default = "default_certificate_cache_size")]
    pub certificate_cache_size: usize,

    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_trigger_poll_interval_seconds")]
    pub trigger_poll_interval_seconds: u64,

    pub server_port: u16,
}

fn default_store_key_prefix() -> String {
    "sns".to_string()
}

fn default_certificate_fetch_timeout_seconds() -> u64 {
    10
}

fn default_certificate_cache_size() -> usize {
    64
}

fn default_trigger_poll_interval_seconds() -> u64 {
    30
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }
}
