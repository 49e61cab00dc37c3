use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use anyhow::{Error, anyhow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TOPIC_ARN_KEY: &str = "topicArn";
pub const SUBSCRIPTION_ARN_KEY: &str = "subscriptionArn";
pub const UNSUBSCRIBE_URL_KEY: &str = "unsubscribeURL";

/// Identifies one SNS trigger configured on a build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerKey {
    pub project_id: String,
    pub build_type_id: String,
    pub trigger_uuid: Uuid,
}

impl TriggerKey {
    pub fn new(project_id: impl Into<String>, build_type_id: impl Into<String>, trigger_uuid: Uuid) -> Self {
        Self {
            project_id: project_id.into(),
            build_type_id: build_type_id.into(),
            trigger_uuid,
        }
    }
}

impl Display for TriggerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}/{}", self.project_id, self.build_type_id, self.trigger_uuid)
    }
}

impl FromStr for TriggerKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');

        match (parts.next(), parts.next(), parts.next()) {
            (Some(project_id), Some(build_type_id), Some(uuid))
                if !project_id.is_empty() && !build_type_id.is_empty() =>
            {
                let trigger_uuid = Uuid::parse_str(uuid)
                    .map_err(|_| anyhow!("Invalid trigger uuid in key '{}'", s))?;
                Ok(Self::new(project_id, build_type_id, trigger_uuid))
            }
            _ => Err(anyhow!("Invalid trigger key '{}'", s)),
        }
    }
}
