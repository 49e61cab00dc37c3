//! Error taxonomy for message authentication, the shared store and the
//! trigger integration.
//!
//! Verification failures are surfaced to the HTTP boundary with a distinct
//! kind per failure point. Store flush exhaustion never leaves the store
//! wrapper; it is logged there and the writes stay pending.

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A payload field required by the declared message type is missing or unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed SNS message: field '{field}' {reason}")]
pub struct MalformedMessage {
    pub field: &'static str,
    pub reason: String,
}

impl MalformedMessage {
    pub fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "is missing".to_string(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: format!("is invalid: {}", reason.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to fetch signing certificate from {url}")]
    Fetch {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("Signing certificate URL {url} is not an AWS SNS endpoint")]
    UntrustedUrl { url: String },

    #[error("Signing certificate returned status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Signing certificate is not a valid PEM encoded X.509 certificate: {0}")]
    Parse(String),

    #[error("Signing certificate is outside of its validity period")]
    NotValidNow,
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error(transparent)]
    MalformedMessage(#[from] MalformedMessage),

    #[error("Can't decode SNS message signature")]
    SignatureDecode(#[source] base64::DecodeError),

    #[error("Can't get signature certificate from SNS message")]
    CertificateFetch(#[source] CertificateError),

    #[error("Invalid SignatureVersion value")]
    SignatureVersion { value: Option<String> },

    #[error("Signature verification failed")]
    SignatureMismatch(#[source] ring::error::Unspecified),
}

impl VerificationError {
    /// Signature encoding problems, including an unsupported signature version.
    pub fn is_decoding_failure(&self) -> bool {
        matches!(
            self,
            VerificationError::SignatureDecode(_) | VerificationError::SignatureVersion { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store was modified concurrently (expected version {expected}, found {actual})")]
    Conflict { expected: u64, actual: u64 },

    #[error("Store backend failure: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store flush gave up after {attempts} attempts")]
    ConflictExhausted { attempts: u32 },
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Can't read or write pending notifications")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to enqueue build: {0}")]
    BuildQueue(#[source] anyhow::Error),
}

/// Why an inbound SNS request was rejected.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error(transparent)]
    Malformed(#[from] MalformedMessage),

    #[error("SNS message verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error("Trigger isn't subscribed to topic {topic}")]
    NotSubscribed { topic: String },

    #[error("Couldn't subscribe: {0}")]
    Subscription(#[source] anyhow::Error),

    #[error(transparent)]
    Trigger(#[from] TriggerError),
}

impl From<StoreError> for EndpointError {
    fn from(error: StoreError) -> Self {
        EndpointError::Trigger(TriggerError::Store(error))
    }
}
