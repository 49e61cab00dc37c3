use std::{collections::HashSet, sync::Arc};

use tracing::{debug, error};

use crate::{
    errors::TriggerError,
    models::{
        notification::{MESSAGES_KEY, NotificationRecord, PendingSet},
        trigger::{SUBSCRIPTION_ARN_KEY, TOPIC_ARN_KEY, UNSUBSCRIBE_URL_KEY},
    },
    store::{ReconcilingStore, SharedStore, merge},
};

/// Subscription details and pending notifications of one trigger.
pub struct TriggerState {
    store: ReconcilingStore,
}

impl TriggerState {
    pub async fn open(store: Arc<dyn SharedStore>) -> Result<Self, TriggerError> {
        Ok(Self {
            store: ReconcilingStore::open(store).await?,
        })
    }

    pub fn subscription_arn(&self) -> Option<&str> {
        self.store.get_value(SUBSCRIPTION_ARN_KEY)
    }

    pub fn topic_arn(&self) -> Option<&str> {
        self.store.get_value(TOPIC_ARN_KEY)
    }

    pub fn unsubscribe_url(&self) -> Option<&str> {
        self.store.get_value(UNSUBSCRIBE_URL_KEY)
    }

    /// Pending notifications. An unreadable stored set counts as empty, so
    /// the next write replaces it.
    pub fn registered_messages(&self) -> PendingSet {
        match merge::parse_pending_set(self.store.get_value(MESSAGES_KEY)) {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Failed to read registered SNS notifications");
                PendingSet::new()
            }
        }
    }

    pub fn has_new_notifications(&self) -> bool {
        !self.registered_messages().is_empty()
    }

    /// Starts a fresh subscription. Notifications pending from an earlier
    /// subscription are dropped.
    pub async fn record_subscription(&mut self, topic_arn: &str, subscription_arn: &str) {
        self.store.put_values([
            (TOPIC_ARN_KEY, Some(topic_arn.to_string())),
            (SUBSCRIPTION_ARN_KEY, Some(subscription_arn.to_string())),
            (MESSAGES_KEY, None),
        ]);
        self.store.flush().await;
    }

    pub async fn clear_subscription(&mut self) {
        self.store.put_values([
            (SUBSCRIPTION_ARN_KEY, None),
            (TOPIC_ARN_KEY, None),
            (UNSUBSCRIBE_URL_KEY, None),
            (MESSAGES_KEY, None),
        ]);
        self.store.flush().await;
    }

    /// Adds a notification to the pending set, remembers its unsubscribe
    /// URL and flushes.
    pub async fn register_message(&mut self, record: NotificationRecord) -> Result<(), TriggerError> {
        let mut messages = self.registered_messages();

        debug!(message_id = %record.message_id, "Registering SNS notification");
        self.store
            .put_value(UNSUBSCRIBE_URL_KEY, record.unsubscribe_url.clone());
        messages.insert(record.message_id.clone(), record);

        self.store
            .put_value(MESSAGES_KEY, merge::serialize_pending_set(&messages)?);
        self.store.flush().await;

        Ok(())
    }

    /// Drops the given ids from the pending set and flushes.
    pub async fn persist(&mut self, consumed: &HashSet<String>) -> Result<(), TriggerError> {
        let mut messages = self.registered_messages();
        messages.retain(|id, _| !consumed.contains(id));

        self.store
            .put_value(MESSAGES_KEY, merge::serialize_pending_set(&messages)?);
        self.store.flush().await;

        Ok(())
    }
}
