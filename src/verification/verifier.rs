use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use serde_json::Value;
use x509_parser::pem::parse_x509_pem;

use crate::{
    clients::certificate::{CertificateFetcher, validate_certificate_url},
    errors::{CertificateError, VerificationError},
    models::message::{
        SIGNATURE_KEY, SIGNATURE_VERSION_KEY, SIGNING_CERT_URL_KEY, SignatureContext,
    },
    verification::canonical::string_to_sign,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVersion {
    /// `"1"`: RSA PKCS#1 v1.5 over SHA-1.
    Sha1WithRsa,
    /// `"2"`: RSA PKCS#1 v1.5 over SHA-256.
    Sha256WithRsa,
}

impl SignatureVersion {
    pub fn from_value(value: Option<&str>) -> Result<Self, VerificationError> {
        match value {
            Some("1") => Ok(SignatureVersion::Sha1WithRsa),
            Some("2") => Ok(SignatureVersion::Sha256WithRsa),
            other => Err(VerificationError::SignatureVersion {
                value: other.map(str::to_string),
            }),
        }
    }

    pub fn algorithm(&self) -> &'static dyn VerificationAlgorithm {
        match self {
            SignatureVersion::Sha1WithRsa => {
                &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY
            }
            SignatureVersion::Sha256WithRsa => &signature::RSA_PKCS1_2048_8192_SHA256,
        }
    }
}

/// Authenticates one SNS message against the certificate it references.
///
/// The verifier performs a single certificate fetch and never logs; every
/// failure comes back as a distinct [`VerificationError`] kind.
pub struct SignatureVerifier<'a> {
    context: &'a SignatureContext,
    fetcher: &'a dyn CertificateFetcher,
}

impl<'a> SignatureVerifier<'a> {
    pub fn new(context: &'a SignatureContext, fetcher: &'a dyn CertificateFetcher) -> Self {
        Self { context, fetcher }
    }

    pub async fn verify(&self) -> Result<(), VerificationError> {
        let signature = self.decode_signature()?;
        let public_key = self.signing_public_key().await?;
        let version = self.signature_version()?;
        let message = string_to_sign(self.context)?;

        UnparsedPublicKey::new(version.algorithm(), &public_key)
            .verify(message.as_bytes(), &signature)
            .map_err(VerificationError::SignatureMismatch)
    }

    pub async fn is_valid(&self) -> bool {
        self.verify().await.is_ok()
    }

    fn decode_signature(&self) -> Result<Vec<u8>, VerificationError> {
        let encoded = self.context.required_field(SIGNATURE_KEY)?;

        BASE64
            .decode(encoded)
            .map_err(VerificationError::SignatureDecode)
    }

    async fn signing_public_key(&self) -> Result<Vec<u8>, VerificationError> {
        let url = self.context.required_field(SIGNING_CERT_URL_KEY)?;
        validate_certificate_url(url).map_err(VerificationError::CertificateFetch)?;

        let pem = self
            .fetcher
            .fetch(url)
            .await
            .map_err(VerificationError::CertificateFetch)?;

        public_key_from_pem(&pem).map_err(VerificationError::CertificateFetch)
    }

    fn signature_version(&self) -> Result<SignatureVersion, VerificationError> {
        match self.context.payload.get(SIGNATURE_VERSION_KEY) {
            None | Some(Value::Null) => SignatureVersion::from_value(None),
            Some(Value::String(value)) => SignatureVersion::from_value(Some(value.as_str())),
            Some(other) => Err(VerificationError::SignatureVersion {
                value: Some(other.to_string()),
            }),
        }
    }
}

/// Parses a PEM X.509 certificate and returns its DER subject public key,
/// rejecting certificates outside their validity window.
pub fn public_key_from_pem(pem: &[u8]) -> Result<Vec<u8>, CertificateError> {
    let (_, pem) = parse_x509_pem(pem).map_err(|e| CertificateError::Parse(e.to_string()))?;
    let certificate = pem
        .parse_x509()
        .map_err(|e| CertificateError::Parse(e.to_string()))?;

    if !certificate.validity().is_valid() {
        return Err(CertificateError::NotValidNow);
    }

    Ok(certificate.public_key().subject_public_key.data.to_vec())
}
