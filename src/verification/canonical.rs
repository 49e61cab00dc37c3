use crate::{
    errors::MalformedMessage,
    models::message::{
        MESSAGE_ID_KEY, MESSAGE_KEY, MessageType, SUBJECT_KEY, SUBSCRIBE_URL_KEY,
        SignatureContext, TIMESTAMP_KEY, TOKEN_KEY, TOPIC_ARN_KEY, TYPE_KEY,
    },
};

/// (field, required) pairs in the order SNS signs them.
const NOTIFICATION_FIELDS: [(&str, bool); 6] = [
    (MESSAGE_KEY, true),
    (MESSAGE_ID_KEY, true),
    (SUBJECT_KEY, false),
    (TIMESTAMP_KEY, true),
    (TOPIC_ARN_KEY, true),
    (TYPE_KEY, true),
];

/// Subscription and unsubscribe confirmations share one field set.
const CONFIRMATION_FIELDS: [(&str, bool); 7] = [
    (MESSAGE_KEY, true),
    (MESSAGE_ID_KEY, true),
    (SUBSCRIBE_URL_KEY, true),
    (TIMESTAMP_KEY, true),
    (TOKEN_KEY, true),
    (TOPIC_ARN_KEY, true),
    (TYPE_KEY, true),
];

pub fn signed_fields(message_type: MessageType) -> &'static [(&'static str, bool)] {
    match message_type {
        MessageType::Notification => &NOTIFICATION_FIELDS,
        MessageType::SubscriptionConfirmation | MessageType::UnsubscribeConfirmation => {
            &CONFIRMATION_FIELDS
        }
    }
}

/// Builds the exact string SNS signed for this message.
///
/// Every present field contributes `"{name}\n{value}\n"`; absent optional
/// fields are skipped entirely rather than written as empty values.
pub fn string_to_sign(context: &SignatureContext) -> Result<String, MalformedMessage> {
    let mut result = String::new();

    for &(key, required) in signed_fields(context.message_type) {
        let value = if required {
            Some(context.required_field(key)?)
        } else {
            context.field(key)?
        };

        if let Some(value) = value {
            result.push_str(key);
            result.push('\n');
            result.push_str(value);
            result.push('\n');
        }
    }

    Ok(result)
}
