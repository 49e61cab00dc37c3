//! Authentication of inbound SNS messages.
//!
//! [`canonical`] rebuilds the string SNS signed for a message type and
//! [`verifier`] checks the embedded signature against the signing certificate.

pub mod canonical;
pub mod verifier;

pub use canonical::string_to_sign;
pub use verifier::{SignatureVerifier, SignatureVersion, public_key_from_pem};
