use std::fmt::{Display, Formatter, Result as FmtResult};

use serde_json::{Map, Value};

use crate::errors::MalformedMessage;

/// Provider payload exactly as delivered.
pub type RawPayload = Map<String, Value>;

pub const TYPE_KEY: &str = "Type";
pub const MESSAGE_KEY: &str = "Message";
pub const MESSAGE_ID_KEY: &str = "MessageId";
pub const SUBJECT_KEY: &str = "Subject";
pub const TIMESTAMP_KEY: &str = "Timestamp";
pub const TOKEN_KEY: &str = "Token";
pub const TOPIC_ARN_KEY: &str = "TopicArn";
pub const MESSAGE_ATTRIBUTES_KEY: &str = "MessageAttributes";
pub const SUBSCRIBE_URL_KEY: &str = "SubscribeURL";
pub const UNSUBSCRIBE_URL_KEY: &str = "UnsubscribeURL";
pub const SIGNING_CERT_URL_KEY: &str = "SigningCertURL";
pub const SIGNATURE_KEY: &str = "Signature";
pub const SIGNATURE_VERSION_KEY: &str = "SignatureVersion";

pub const SUBSCRIPTION_ARN_HEADER: &str = "x-amz-sns-subscription-arn";
pub const MESSAGE_ID_HEADER: &str = "x-amz-sns-message-id";
pub const TOPIC_ARN_HEADER: &str = "x-amz-sns-topic-arn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    SubscriptionConfirmation,
    UnsubscribeConfirmation,
    Notification,
}

impl MessageType {
    pub fn from_type_field(value: &str) -> Option<Self> {
        match value.trim() {
            "SubscriptionConfirmation" => Some(MessageType::SubscriptionConfirmation),
            "UnsubscribeConfirmation" => Some(MessageType::UnsubscribeConfirmation),
            "Notification" => Some(MessageType::Notification),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::SubscriptionConfirmation => "SubscriptionConfirmation",
            MessageType::UnsubscribeConfirmation => "UnsubscribeConfirmation",
            MessageType::Notification => "Notification",
        }
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// A payload paired with its declared type, built once per inbound message.
#[derive(Debug, Clone)]
pub struct SignatureContext {
    pub message_type: MessageType,
    pub payload: RawPayload,
}

impl SignatureContext {
    pub fn new(message_type: MessageType, payload: RawPayload) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    pub fn from_payload(payload: RawPayload) -> Result<Self, MalformedMessage> {
        let declared = payload
            .get(TYPE_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| MalformedMessage::missing(TYPE_KEY))?;

        let message_type = MessageType::from_type_field(declared).ok_or_else(|| {
            MalformedMessage::invalid(TYPE_KEY, format!("unsupported message type '{}'", declared))
        })?;

        Ok(Self::new(message_type, payload))
    }

    pub fn field(&self, key: &'static str) -> Result<Option<&str>, MalformedMessage> {
        string_field(&self.payload, key)
    }

    pub fn required_field(&self, key: &'static str) -> Result<&str, MalformedMessage> {
        required_string_field(&self.payload, key)
    }
}

/// Returns the string value of `key`. JSON `null` reads as absent.
pub fn string_field<'a>(
    payload: &'a RawPayload,
    key: &'static str,
) -> Result<Option<&'a str>, MalformedMessage> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(_) => Err(MalformedMessage::invalid(key, "expected a string value")),
    }
}

pub fn required_string_field<'a>(
    payload: &'a RawPayload,
    key: &'static str,
) -> Result<&'a str, MalformedMessage> {
    string_field(payload, key)?.ok_or_else(|| MalformedMessage::missing(key))
}

/// Delivery metadata SNS sends as HTTP headers alongside the body.
#[derive(Debug, Clone, Default)]
pub struct SnsHeaders {
    pub message_id: Option<String>,
    pub topic_arn: Option<String>,
    pub subscription_arn: Option<String>,
}
