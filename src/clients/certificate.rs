use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Url};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{config::Config, errors::CertificateError};

pub const DEFAULT_CERTIFICATE_CACHE_SIZE: usize = 64;

/// Accepts only `https` URLs on an SNS regional endpoint
/// (`sns.<region>.amazonaws.com`, or `.amazonaws.com.cn`) on the default port.
pub fn validate_certificate_url(url: &str) -> Result<Url, CertificateError> {
    let untrusted = || CertificateError::UntrustedUrl {
        url: url.to_string(),
    };

    let parsed = Url::parse(url).map_err(|_| untrusted())?;

    if parsed.scheme() != "https" || parsed.port().is_some() {
        return Err(untrusted());
    }

    match parsed.host_str() {
        Some(host) if is_sns_host(host) => Ok(parsed),
        _ => Err(untrusted()),
    }
}

fn is_sns_host(host: &str) -> bool {
    let region = host.strip_prefix("sns.").and_then(|rest| {
        rest.strip_suffix(".amazonaws.com")
            .or_else(|| rest.strip_suffix(".amazonaws.com.cn"))
    });

    matches!(region, Some(region) if !region.is_empty()
        && region.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
}

/// Resolves a signing certificate URL to the raw PEM body.
#[async_trait]
pub trait CertificateFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, CertificateError>;
}

pub struct HttpCertificateFetcher {
    http_client: Client,
}

impl HttpCertificateFetcher {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.certificate_fetch_timeout_seconds))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(
            timeout_seconds = config.certificate_fetch_timeout_seconds,
            "Certificate fetcher initialized"
        );

        Ok(Self { http_client })
    }
}

#[async_trait]
impl CertificateFetcher for HttpCertificateFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, CertificateError> {
        debug!(url, "Fetching signing certificate");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| CertificateError::Fetch {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CertificateError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| CertificateError::Fetch {
            url: url.to_string(),
            source: Box::new(e),
        })?;

        Ok(body.to_vec())
    }
}

#[derive(Default)]
struct CertificateCache {
    entries: HashMap<String, Vec<u8>>,
    insertion_order: VecDeque<String>,
}

/// Remembers successfully fetched certificates per URL, evicting the oldest
/// entry once `capacity` is reached. Failures are not cached.
pub struct CachingCertificateFetcher {
    inner: Arc<dyn CertificateFetcher>,
    capacity: usize,
    cache: RwLock<CertificateCache>,
}

impl CachingCertificateFetcher {
    pub fn new(inner: Arc<dyn CertificateFetcher>) -> Self {
        Self::with_capacity(inner, DEFAULT_CERTIFICATE_CACHE_SIZE)
    }

    pub fn with_capacity(inner: Arc<dyn CertificateFetcher>, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            cache: RwLock::new(CertificateCache::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CertificateFetcher for CachingCertificateFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, CertificateError> {
        if let Some(certificate) = self.cache.read().await.entries.get(url) {
            debug!(url, "Signing certificate served from cache");
            return Ok(certificate.clone());
        }

        let certificate = self.inner.fetch(url).await?;

        let mut cache = self.cache.write().await;
        if !cache.entries.contains_key(url) {
            while cache.entries.len() >= self.capacity {
                let Some(oldest) = cache.insertion_order.pop_front() else {
                    break;
                };
                cache.entries.remove(&oldest);
                debug!(url = %oldest, "Evicted signing certificate from cache");
            }

            cache.insertion_order.push_back(url.to_string());
            cache.entries.insert(url.to_string(), certificate.clone());
        }

        Ok(certificate)
    }
}
