use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use ring::{
    rand::SystemRandom,
    signature::{RSA_PKCS1_SHA256, RsaKeyPair},
};
use serde_json::{Value, json};
use sns_trigger_service::{
    clients::certificate::CertificateFetcher,
    config::Config,
    errors::{CertificateError, StoreError},
    models::{
        message::{RawPayload, SignatureContext, SnsHeaders},
        notification::NotificationRecord,
    },
    store::{MemoryStore, Overlay, SharedStore, StoreSnapshot},
    trigger::policy::{BuildQueue, BuildRequest},
    verification::string_to_sign,
};

pub const SIGNING_CERT_URL: &str =
    "https://sns.us-east-1.amazonaws.com/SimpleNotificationService-test.pem";
pub const TOPIC_ARN: &str = "arn:aws:sns:us-east-1:123456789012:builds";
pub const SUBSCRIPTION_ARN: &str =
    "arn:aws:sns:us-east-1:123456789012:builds:2bcfbf39-05c3-41de-beaa-fcfcc21c8f55";

pub const SIGNING_CERT: &str = include_str!("fixtures/signing_cert.pem");
pub const UNRELATED_CERT: &str = include_str!("fixtures/unrelated_cert.pem");
const SIGNING_KEY: &[u8] = include_bytes!("fixtures/signing_key.pk8");
const NOTIFICATION_V1_SIGNATURE: &str = include_str!("fixtures/notification_v1.sig");

pub fn object(value: Value) -> RawPayload {
    match value {
        Value::Object(payload) => payload,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// The notification signed with SignatureVersion 1 in the fixtures.
pub fn notification_v1() -> RawPayload {
    object(json!({
        "Type": "Notification",
        "MessageId": "2f3c4a1e-sha1-4b2d-9e57-1c0de5a1f00d",
        "TopicArn": TOPIC_ARN,
        "Subject": "Deploy",
        "Message": "hello from sns",
        "Timestamp": "2024-05-01T12:00:00.000Z",
        "SignatureVersion": "1",
        "Signature": NOTIFICATION_V1_SIGNATURE.trim(),
        "SigningCertURL": SIGNING_CERT_URL,
        "UnsubscribeURL": "https://sns.us-east-1.amazonaws.com/?Action=Unsubscribe",
    }))
}

pub fn notification(message_id: &str, message: &str, timestamp: &str) -> RawPayload {
    object(json!({
        "Type": "Notification",
        "MessageId": message_id,
        "TopicArn": TOPIC_ARN,
        "Subject": "Deploy",
        "Message": message,
        "Timestamp": timestamp,
        "UnsubscribeURL": "https://sns.us-east-1.amazonaws.com/?Action=Unsubscribe",
        "MessageAttributes": {
            "env": { "Type": "String", "Value": "staging" },
        },
    }))
}

pub fn subscription_confirmation(message_type: &str, subscribe_url: &str) -> RawPayload {
    object(json!({
        "Type": message_type,
        "MessageId": "165545c9-2a5c-472c-8df2-7ff2be2b3b1b",
        "Token": "2336412f37fb687f5d51e6e241d09c805a5a57b30d712f794cc5f6a988666d92768dd60a747ba6f3beb71854e285d6ad02428b09ceece29417f1f02d609c582afbacc99c583a916b9981dd2728f4ae6fdb82efd087cc3b7849e05798d2d2785c03b0879594eeac82c01f235d0e717736",
        "TopicArn": TOPIC_ARN,
        "Message": "You have chosen to subscribe to the topic.",
        "SubscribeURL": subscribe_url,
        "Timestamp": "2024-05-01T11:59:00.000Z",
    }))
}

/// Body AWS returns from a `SubscribeURL` visit.
pub fn confirmation_response(arn: &str) -> String {
    format!(
        r#"<ConfirmSubscriptionResponse xmlns="http://sns.amazonaws.com/doc/2010-03-31/">
  <ConfirmSubscriptionResult>
    <SubscriptionArn>{}</SubscriptionArn>
  </ConfirmSubscriptionResult>
  <ResponseMetadata>
    <RequestId>075ecce8-8dac-11e1-bf80-f781d96e8c26</RequestId>
  </ResponseMetadata>
</ConfirmSubscriptionResponse>"#,
        arn
    )
}

/// Signs `payload` with the fixture key using SignatureVersion 2.
pub fn sign_v2(mut payload: RawPayload) -> Result<RawPayload> {
    payload.insert("SignatureVersion".to_string(), json!("2"));
    payload.insert("SigningCertURL".to_string(), json!(SIGNING_CERT_URL));

    let context = SignatureContext::from_payload(payload.clone())?;
    let message = string_to_sign(&context)?;

    let key_pair =
        RsaKeyPair::from_pkcs8(SIGNING_KEY).map_err(|e| anyhow!("Bad fixture key: {}", e))?;
    let mut signature = vec![0; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &RSA_PKCS1_SHA256,
            &SystemRandom::new(),
            message.as_bytes(),
            &mut signature,
        )
        .map_err(|_| anyhow!("Signing failed"))?;

    payload.insert("Signature".to_string(), json!(BASE64.encode(signature)));

    Ok(payload)
}

pub fn headers(message_id: &str) -> SnsHeaders {
    SnsHeaders {
        message_id: Some(message_id.to_string()),
        topic_arn: Some(TOPIC_ARN.to_string()),
        subscription_arn: Some(SUBSCRIPTION_ARN.to_string()),
    }
}

pub fn record(message_id: &str, message: &str, timestamp: &str) -> NotificationRecord {
    NotificationRecord {
        message_id: message_id.to_string(),
        subscription_arn: SUBSCRIPTION_ARN.to_string(),
        topic: TOPIC_ARN.to_string(),
        subject: None,
        message: message.to_string(),
        timestamp: timestamp
            .parse::<DateTime<Utc>>()
            .expect("valid test timestamp"),
        unsubscribe_url: None,
        attributes: None,
    }
}

pub fn test_config(redis_url: &str) -> Config {
    Config {
        redis_url: redis_url.to_string(),
        store_key_prefix: format!("sns-test-{}", uuid::Uuid::new_v4()),
        certificate_fetch_timeout_seconds: 5,
        certificate_cache_size: 8,
        max_retry_attempts: 3,
        initial_retry_delay_ms: 10,
        max_retry_delay_ms: 50,
        retry_backoff_multiplier: 2,
        trigger_poll_interval_seconds: 1,
        server_port: 0,
    }
}

/// Serves fixed certificates by URL and counts fetches.
#[derive(Default)]
pub struct StaticCertificateFetcher {
    certificates: HashMap<String, Vec<u8>>,
    pub calls: AtomicU32,
}

impl StaticCertificateFetcher {
    pub fn with_certificate(url: &str, pem: &str) -> Self {
        Self {
            certificates: HashMap::from([(url.to_string(), pem.as_bytes().to_vec())]),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_certificates(urls: &[&str], pem: &str) -> Self {
        Self {
            certificates: urls
                .iter()
                .map(|url| (url.to_string(), pem.as_bytes().to_vec()))
                .collect(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn signing() -> Self {
        Self::with_certificate(SIGNING_CERT_URL, SIGNING_CERT)
    }
}

#[async_trait]
impl CertificateFetcher for StaticCertificateFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, CertificateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        self.certificates
            .get(url)
            .cloned()
            .ok_or_else(|| CertificateError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Wraps a [`MemoryStore`], counting commits and optionally failing the
/// first `failures` of them or racing a concurrent writer before the first one.
pub struct ScriptedStore {
    inner: MemoryStore,
    failures: AtomicU32,
    concurrent_write: Mutex<Option<Overlay>>,
    pub commits: AtomicU32,
}

impl ScriptedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(0),
            concurrent_write: Mutex::new(None),
            commits: AtomicU32::new(0),
        }
    }

    pub fn failing(inner: MemoryStore, failures: u32) -> Self {
        let store = Self::new(inner);
        store.failures.store(failures, Ordering::SeqCst);
        store
    }

    pub fn racing(inner: MemoryStore, concurrent_write: Overlay) -> Self {
        let store = Self::new(inner);
        *store.concurrent_write.lock().unwrap() = Some(concurrent_write);
        store
    }

    pub fn commit_count(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    pub async fn current(&self) -> StoreSnapshot {
        self.inner.read().await.unwrap()
    }
}

#[async_trait]
impl SharedStore for ScriptedStore {
    async fn read(&self) -> Result<StoreSnapshot, StoreError> {
        self.inner.read().await
    }

    async fn commit(&self, expected_version: u64, writes: &Overlay) -> Result<u64, StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);

        let concurrent = self.concurrent_write.lock().unwrap().take();
        if let Some(concurrent) = concurrent {
            let version = self.inner.read().await?.version;
            self.inner.commit(version, &concurrent).await?;
        }

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        self.inner.commit(expected_version, writes).await
    }
}

/// Records every build request it receives.
#[derive(Default)]
pub struct RecordingBuildQueue {
    pub requests: Mutex<Vec<BuildRequest>>,
    pub fail: bool,
}

impl RecordingBuildQueue {
    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildQueue for RecordingBuildQueue {
    async fn enqueue(&self, request: BuildRequest) -> Result<()> {
        if self.fail {
            return Err(anyhow!("build queue unavailable"));
        }
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}
