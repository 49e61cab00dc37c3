use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    errors::TriggerError,
    models::{notification::NotificationRecord, trigger::TriggerKey},
    trigger::state::TriggerState,
};

pub const DEFAULT_BRANCH: &str = "";
pub const SUBJECT_PARAMETER: &str = "sns.message.subject";
pub const BODY_PARAMETER: &str = "sns.message.body";
pub const ATTRIBUTES_PARAMETER_PREFIX: &str = "sns.message.attributes.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub trigger: TriggerKey,
    pub branch: String,
    pub parameters: BTreeMap<String, String>,
    pub triggered_by: BTreeMap<String, String>,
}

/// Where triggered builds are handed off to the build system.
#[async_trait]
pub trait BuildQueue: Send + Sync {
    async fn enqueue(&self, request: BuildRequest) -> Result<()>;
}

/// Build parameters carried over from a notification.
pub fn build_parameters(record: &NotificationRecord) -> BTreeMap<String, String> {
    let mut parameters = BTreeMap::new();

    if let Some(subject) = &record.subject {
        parameters.insert(SUBJECT_PARAMETER.to_string(), subject.clone());
    }

    parameters.insert(BODY_PARAMETER.to_string(), record.message.clone());

    if let Some(attributes) = &record.attributes {
        for name in attributes.keys() {
            if let Some(value) = record.attribute_value(name) {
                parameters.insert(
                    format!("{}{}", ATTRIBUTES_PARAMETER_PREFIX, name),
                    value.to_string(),
                );
            }
        }
    }

    parameters
}

/// Queues one build for the latest pending notification and consumes every
/// pending notification. Returns whether a build was queued.
pub async fn trigger_build(
    trigger: &TriggerKey,
    state: &mut TriggerState,
    queue: &dyn BuildQueue,
) -> Result<bool, TriggerError> {
    let registered = state.registered_messages();

    let Some(latest) = registered.values().max_by_key(|record| record.timestamp) else {
        debug!(trigger = %trigger, "No new SNS messages registered");
        return Ok(false);
    };

    let triggered_by = BTreeMap::from([
        ("type".to_string(), "sns".to_string()),
        ("triggerId".to_string(), trigger.trigger_uuid.to_string()),
    ]);

    let request = BuildRequest {
        trigger: trigger.clone(),
        branch: DEFAULT_BRANCH.to_string(),
        parameters: build_parameters(latest),
        triggered_by,
    };

    queue
        .enqueue(request)
        .await
        .map_err(TriggerError::BuildQueue)?;

    info!(
        trigger = %trigger,
        message_id = %latest.message_id,
        consumed = registered.len(),
        "Build queued from SNS notification"
    );

    let consumed: HashSet<String> = registered.keys().cloned().collect();
    state.persist(&consumed).await?;

    Ok(true)
}
