use std::sync::{Arc, atomic::Ordering};

use anyhow::Result;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde_json::json;
use sns_trigger_service::{
    clients::certificate::{
        CachingCertificateFetcher, CertificateFetcher, validate_certificate_url,
    },
    errors::{CertificateError, VerificationError},
    models::message::{RawPayload, SignatureContext},
    verification::{SignatureVerifier, public_key_from_pem},
};

use crate::common::{
    SIGNING_CERT, SIGNING_CERT_URL, StaticCertificateFetcher, UNRELATED_CERT, notification,
    notification_v1, sign_v2, subscription_confirmation,
};

async fn verify(
    payload: RawPayload,
    fetcher: &dyn CertificateFetcher,
) -> Result<(), VerificationError> {
    let context = SignatureContext::from_payload(payload)?;
    SignatureVerifier::new(&context, fetcher).verify().await
}

/// Test: A SignatureVersion 1 notification signed by AWS-style SHA1withRSA verifies
#[tokio::test]
async fn test_sha1_signature_verifies() -> Result<()> {
    let fetcher = StaticCertificateFetcher::signing();

    verify(notification_v1(), &fetcher).await?;

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1, "Single certificate fetch");

    Ok(())
}

/// Test: SignatureVersion 2 notifications and confirmations verify
#[tokio::test]
async fn test_sha256_signature_verifies() -> Result<()> {
    let fetcher = StaticCertificateFetcher::signing();

    let payload = sign_v2(notification("m-1", "build please", "2024-05-01T12:00:00.000Z"))?;
    verify(payload, &fetcher).await?;

    let payload = sign_v2(subscription_confirmation(
        "SubscriptionConfirmation",
        "https://sns.us-east-1.amazonaws.com/?Action=ConfirmSubscription",
    ))?;
    verify(payload, &fetcher).await?;

    let payload = sign_v2(subscription_confirmation(
        "UnsubscribeConfirmation",
        "https://sns.us-east-1.amazonaws.com/?Action=ConfirmSubscription",
    ))?;
    verify(payload, &fetcher).await?;

    Ok(())
}

/// Test: Verification result can be consumed as a boolean
#[tokio::test]
async fn test_is_valid_mirrors_verify() -> Result<()> {
    let fetcher = StaticCertificateFetcher::signing();

    let valid = SignatureContext::from_payload(notification_v1())?;
    assert!(SignatureVerifier::new(&valid, &fetcher).is_valid().await);

    let mut tampered = notification_v1();
    tampered.insert("Message".to_string(), json!("hello from sns!"));
    let tampered = SignatureContext::from_payload(tampered)?;
    assert!(!SignatureVerifier::new(&tampered, &fetcher).is_valid().await);

    Ok(())
}

/// Test: Any single byte change to the signature is a mismatch
#[tokio::test]
async fn test_mutated_signature_is_mismatch() -> Result<()> {
    let fetcher = StaticCertificateFetcher::signing();
    let payload = sign_v2(notification("m-1", "build please", "2024-05-01T12:00:00.000Z"))?;

    let signature = BASE64.decode(payload["Signature"].as_str().unwrap_or_default())?;

    for index in [0, signature.len() / 2, signature.len() - 1] {
        let mut mutated = signature.clone();
        mutated[index] ^= 0x01;

        let mut tampered = payload.clone();
        tampered.insert("Signature".to_string(), json!(BASE64.encode(&mutated)));

        let err = verify(tampered, &fetcher).await.unwrap_err();
        assert!(
            matches!(err, VerificationError::SignatureMismatch(_)),
            "Byte {} mutation should be a mismatch, got {:?}",
            index,
            err
        );
    }

    Ok(())
}

/// Test: Changing any signed field is a mismatch
#[tokio::test]
async fn test_mutated_signed_field_is_mismatch() -> Result<()> {
    let fetcher = StaticCertificateFetcher::signing();
    let payload = sign_v2(notification("m-1", "build please", "2024-05-01T12:00:00.000Z"))?;

    for field in ["Message", "MessageId", "Subject", "Timestamp", "TopicArn"] {
        let mut tampered = payload.clone();
        let value = tampered[field].as_str().unwrap_or_default().to_string();
        tampered.insert(field.to_string(), json!(format!("{}x", value)));

        let err = verify(tampered, &fetcher).await.unwrap_err();
        assert!(
            matches!(err, VerificationError::SignatureMismatch(_)),
            "Changing {} should be a mismatch, got {:?}",
            field,
            err
        );
    }

    Ok(())
}

/// Test: Fields outside the signed set don't affect verification
#[tokio::test]
async fn test_unsigned_fields_are_ignored() -> Result<()> {
    let fetcher = StaticCertificateFetcher::signing();
    let mut payload = notification_v1();
    payload.insert(
        "UnsubscribeURL".to_string(),
        json!("https://example.com/elsewhere"),
    );
    payload.insert("MessageAttributes".to_string(), json!({ "k": { "Value": "v" } }));

    verify(payload, &fetcher).await?;

    Ok(())
}

/// Test: A certificate with a different key is a mismatch
#[tokio::test]
async fn test_unrelated_certificate_is_mismatch() -> Result<()> {
    let fetcher = StaticCertificateFetcher::with_certificate(SIGNING_CERT_URL, UNRELATED_CERT);

    let err = verify(notification_v1(), &fetcher).await.unwrap_err();
    assert!(matches!(err, VerificationError::SignatureMismatch(_)));

    Ok(())
}

/// Test: Non-base64 signatures are decode failures
#[tokio::test]
async fn test_bad_base64_is_decode_error() -> Result<()> {
    let fetcher = StaticCertificateFetcher::signing();
    let mut payload = notification_v1();
    payload.insert("Signature".to_string(), json!("not*base64!"));

    let err = verify(payload, &fetcher).await.unwrap_err();
    assert!(matches!(err, VerificationError::SignatureDecode(_)));
    assert!(err.is_decoding_failure());
    assert_eq!(err.to_string(), "Can't decode SNS message signature");
    assert_eq!(
        fetcher.calls.load(Ordering::SeqCst),
        0,
        "No certificate fetch for an undecodable signature"
    );

    Ok(())
}

/// Test: Unsupported SignatureVersion values are rejected by message
#[tokio::test]
async fn test_unsupported_signature_version() -> Result<()> {
    let fetcher = StaticCertificateFetcher::signing();

    for version in [json!("42"), json!(null), json!(2)] {
        let mut payload = notification_v1();
        payload.insert("SignatureVersion".to_string(), version.clone());

        let err = verify(payload, &fetcher).await.unwrap_err();
        assert!(
            matches!(err, VerificationError::SignatureVersion { .. }),
            "{} should be a SignatureVersion error",
            version
        );
        assert_eq!(err.to_string(), "Invalid SignatureVersion value");
        assert!(err.is_decoding_failure());
    }

    Ok(())
}

/// Test: Certificate fetch failures are reported as such
#[tokio::test]
async fn test_certificate_fetch_failure() -> Result<()> {
    let fetcher = StaticCertificateFetcher::default();

    let err = verify(notification_v1(), &fetcher).await.unwrap_err();
    assert!(matches!(
        err,
        VerificationError::CertificateFetch(CertificateError::Status { status: 404, .. })
    ));
    assert!(!err.is_decoding_failure());

    Ok(())
}

/// Test: A body that isn't a certificate is a fetch error
#[tokio::test]
async fn test_non_pem_certificate_is_fetch_error() -> Result<()> {
    let fetcher =
        StaticCertificateFetcher::with_certificate(SIGNING_CERT_URL, "<html>not found</html>");

    let err = verify(notification_v1(), &fetcher).await.unwrap_err();
    assert!(matches!(
        err,
        VerificationError::CertificateFetch(CertificateError::Parse(_))
    ));

    Ok(())
}

/// Test: Missing signature inputs are malformed messages
#[tokio::test]
async fn test_missing_signature_fields_are_malformed() -> Result<()> {
    let fetcher = StaticCertificateFetcher::signing();

    for field in ["Signature", "SigningCertURL", "Timestamp"] {
        let mut payload = notification_v1();
        payload.remove(field);

        let err = verify(payload, &fetcher).await.unwrap_err();
        match err {
            VerificationError::MalformedMessage(malformed) => assert_eq!(malformed.field, field),
            other => panic!("Missing {} should be malformed, got {:?}", field, other),
        }
    }

    Ok(())
}

/// Test: Unknown message types are rejected before verification
#[tokio::test]
async fn test_unknown_type_is_malformed() -> Result<()> {
    let mut payload = notification_v1();
    payload.insert("Type".to_string(), json!("Surprise"));

    let err = SignatureContext::from_payload(payload).unwrap_err();
    assert_eq!(err.field, "Type");

    Ok(())
}

/// Test: Public key extraction accepts the fixture certificate
#[tokio::test]
async fn test_public_key_from_pem() -> Result<()> {
    let key = public_key_from_pem(SIGNING_CERT.as_bytes())?;
    assert!(!key.is_empty());

    assert!(public_key_from_pem(b"garbage").is_err());

    Ok(())
}

/// Test: Certificates are fetched once per URL when cached
#[tokio::test]
async fn test_caching_fetcher_fetches_once() -> Result<()> {
    let inner = Arc::new(StaticCertificateFetcher::signing());
    let fetcher = CachingCertificateFetcher::new(inner.clone());

    for _ in 0..3 {
        verify(notification_v1(), &fetcher).await?;
    }
    assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

    assert!(fetcher.fetch("https://example.com/missing.pem").await.is_err());
    assert!(fetcher.fetch("https://example.com/missing.pem").await.is_err());
    assert_eq!(
        inner.calls.load(Ordering::SeqCst),
        3,
        "Failures are not cached"
    );

    Ok(())
}

/// Test: Certificates are only fetched from SNS https endpoints
#[tokio::test]
async fn test_untrusted_certificate_url_is_not_fetched() -> Result<()> {
    let fetcher = StaticCertificateFetcher::signing();

    for url in [
        "http://sns.us-east-1.amazonaws.com/SimpleNotificationService-test.pem",
        "https://attacker.example.com/SimpleNotificationService-test.pem",
        "https://sns.us-east-1.amazonaws.com.attacker.example/cert.pem",
        "https://sns.us-east-1.amazonaws.com:8443/cert.pem",
        "https://s3.amazonaws.com/cert.pem",
        "not a url",
    ] {
        let mut payload = notification_v1();
        payload.insert("SigningCertURL".to_string(), json!(url));

        let err = verify(payload, &fetcher).await.unwrap_err();
        assert!(
            matches!(
                err,
                VerificationError::CertificateFetch(CertificateError::UntrustedUrl { .. })
            ),
            "{} should be rejected, got {:?}",
            url,
            err
        );
    }

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0, "Nothing was fetched");

    Ok(())
}

/// Test: Regional SNS endpoints are accepted as certificate URLs
#[test]
fn test_sns_certificate_urls_are_accepted() {
    for url in [
        SIGNING_CERT_URL,
        "https://sns.eu-west-2.amazonaws.com/SimpleNotificationService-abc.pem",
        "https://sns.cn-north-1.amazonaws.com.cn/SimpleNotificationService-abc.pem",
    ] {
        assert!(validate_certificate_url(url).is_ok(), "{} should be accepted", url);
    }
}

/// Test: The certificate cache never holds more than its capacity
#[tokio::test]
async fn test_caching_fetcher_is_bounded() -> Result<()> {
    let urls = [
        "https://sns.us-east-1.amazonaws.com/a.pem",
        "https://sns.us-east-1.amazonaws.com/b.pem",
        "https://sns.us-east-1.amazonaws.com/c.pem",
    ];
    let inner = Arc::new(StaticCertificateFetcher::with_certificates(&urls, SIGNING_CERT));
    let fetcher = CachingCertificateFetcher::with_capacity(inner.clone(), 2);

    for url in urls {
        fetcher.fetch(url).await?;
    }
    assert_eq!(fetcher.len().await, 2);
    assert_eq!(inner.calls.load(Ordering::SeqCst), 3);

    fetcher.fetch(urls[2]).await?;
    assert_eq!(inner.calls.load(Ordering::SeqCst), 3, "Newest entry is cached");

    fetcher.fetch(urls[0]).await?;
    assert_eq!(
        inner.calls.load(Ordering::SeqCst),
        4,
        "Oldest entry was evicted"
    );
    assert_eq!(fetcher.len().await, 2);

    Ok(())
}
