use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::{
    clients::{certificate::CertificateFetcher, subscription::SubscriptionClient},
    errors::EndpointError,
    models::{
        message::{
            MessageType, RawPayload, SUBSCRIBE_URL_KEY, SignatureContext, SnsHeaders, TOPIC_ARN_KEY,
        },
        notification::NotificationRecord,
        response::MessageOutcome,
        retry::RetryConfig,
        trigger::TriggerKey,
    },
    store::StoreProvider,
    trigger::state::TriggerState,
    verification::SignatureVerifier,
};

/// Authenticates an inbound SNS message and applies it to the trigger's state.
///
/// Messages that fail verification are rejected before the trigger state is
/// opened.
pub async fn process_message(
    trigger: &TriggerKey,
    headers: &SnsHeaders,
    payload: RawPayload,
    fetcher: &dyn CertificateFetcher,
    subscription_client: &SubscriptionClient,
    provider: &dyn StoreProvider,
) -> Result<MessageOutcome, EndpointError> {
    let context = SignatureContext::from_payload(payload)?;

    info!(
        trigger = %trigger,
        message_type = %context.message_type,
        message_id = ?headers.message_id,
        "Processing SNS message"
    );

    if let Err(e) = SignatureVerifier::new(&context, fetcher).verify().await {
        warn!(
            trigger = %trigger,
            message_type = %context.message_type,
            error = %e,
            "SNS message verification failed"
        );
        return Err(e.into());
    }

    let mut state = TriggerState::open(provider.open(trigger)).await?;

    match context.message_type {
        MessageType::SubscriptionConfirmation => {
            let subscribe_url = context.required_field(SUBSCRIBE_URL_KEY)?;
            let topic_arn = match &headers.topic_arn {
                Some(topic) => topic.clone(),
                None => context.required_field(TOPIC_ARN_KEY)?.to_string(),
            };

            let subscription_arn = subscription_client
                .confirm(subscribe_url)
                .await
                .map_err(EndpointError::Subscription)?;

            state.record_subscription(&topic_arn, &subscription_arn).await;
            provider.remember_trigger(trigger).await?;

            info!(
                trigger = %trigger,
                topic_arn = %topic_arn,
                subscription_arn = %subscription_arn,
                "SNS subscription confirmed"
            );

            Ok(MessageOutcome::Subscribed)
        }
        MessageType::UnsubscribeConfirmation => {
            state.clear_subscription().await;

            info!(trigger = %trigger, "SNS subscription removed");

            Ok(MessageOutcome::Unsubscribed)
        }
        MessageType::Notification => {
            let record = NotificationRecord::from_payload(&context.payload, headers)?;

            if state.subscription_arn() != Some(record.subscription_arn.as_str()) {
                warn!(
                    trigger = %trigger,
                    topic = %record.topic,
                    "Notification for a subscription this trigger doesn't hold"
                );
                return Err(EndpointError::NotSubscribed {
                    topic: record.topic,
                });
            }

            let message_id = record.message_id.clone();
            state.register_message(record).await?;

            info!(trigger = %trigger, message_id = %message_id, "SNS notification registered");

            Ok(MessageOutcome::NotificationRegistered)
        }
    }
}

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms,
                    error = %e,
                    "Retry attempt failed, backing off"
                );

                let jitter = rand::random_range(-0.1..=0.1);

                let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

                sleep(Duration::from_millis(jittered_delay)).await;

                delay_ms = std::cmp::min(delay_ms * config.backoff_multiplier, config.max_delay_ms);
            }
        }
    }
}
