use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    errors::MalformedMessage,
    models::message::{
        MESSAGE_ATTRIBUTES_KEY, MESSAGE_ID_KEY, MESSAGE_KEY, RawPayload, SUBJECT_KEY,
        SUBSCRIPTION_ARN_HEADER, SnsHeaders, TIMESTAMP_KEY, TOPIC_ARN_KEY, UNSUBSCRIBE_URL_KEY,
        required_string_field, string_field,
    },
};

/// Store key holding the serialized pending-notification set.
pub const MESSAGES_KEY: &str = "messages";

/// Pending notifications keyed by message id.
pub type PendingSet = BTreeMap<String, NotificationRecord>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub message_id: String,
    pub subscription_arn: String,
    pub topic: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    pub message: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsubscribe_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
}

impl NotificationRecord {
    /// Builds a record from an authenticated notification.
    ///
    /// Message id and topic come from the delivery headers when present and
    /// fall back to the payload. The subscription ARN only travels as a header.
    pub fn from_payload(payload: &RawPayload, headers: &SnsHeaders) -> Result<Self, MalformedMessage> {
        let message_id = match &headers.message_id {
            Some(id) => id.clone(),
            None => required_string_field(payload, MESSAGE_ID_KEY)?.to_string(),
        };

        let topic = match &headers.topic_arn {
            Some(topic) => topic.clone(),
            None => required_string_field(payload, TOPIC_ARN_KEY)?.to_string(),
        };

        let subscription_arn = headers
            .subscription_arn
            .clone()
            .ok_or_else(|| MalformedMessage::missing(SUBSCRIPTION_ARN_HEADER))?;

        let raw_timestamp = required_string_field(payload, TIMESTAMP_KEY)?;
        let timestamp = DateTime::parse_from_rfc3339(raw_timestamp)
            .map_err(|e| MalformedMessage::invalid(TIMESTAMP_KEY, e.to_string()))?
            .with_timezone(&Utc);

        let attributes = match payload.get(MESSAGE_ATTRIBUTES_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::Object(attributes)) => Some(attributes.clone()),
            Some(_) => {
                return Err(MalformedMessage::invalid(
                    MESSAGE_ATTRIBUTES_KEY,
                    "expected an object",
                ));
            }
        };

        Ok(Self {
            message_id,
            subscription_arn,
            topic,
            subject: string_field(payload, SUBJECT_KEY)?.map(str::to_string),
            message: required_string_field(payload, MESSAGE_KEY)?.to_string(),
            timestamp,
            unsubscribe_url: string_field(payload, UNSUBSCRIBE_URL_KEY)?.map(str::to_string),
            attributes,
        })
    }

    /// String value of a message attribute, read from its `Value` member.
    pub fn attribute_value(&self, name: &str) -> Option<&str> {
        self.attributes
            .as_ref()?
            .get(name)?
            .get("Value")?
            .as_str()
    }
}
