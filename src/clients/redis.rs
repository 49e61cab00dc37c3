use std::{collections::HashMap, sync::Arc};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::MultiplexedConnection};
use tracing::{info, warn};

use crate::{
    config::Config,
    errors::StoreError,
    models::trigger::TriggerKey,
    store::{Overlay, SharedStore, StoreProvider, StoreSnapshot},
};

/// KEYS[1] data hash, KEYS[2] version counter.
/// ARGV[1] expected version, then (op, field, value) triples.
const COMMIT_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[2]) or '0')
if current ~= tonumber(ARGV[1]) then
  return {0, current}
end
for i = 2, #ARGV, 3 do
  if ARGV[i] == 'set' then
    redis.call('HSET', KEYS[1], ARGV[i + 1], ARGV[i + 2])
  else
    redis.call('HDEL', KEYS[1], ARGV[i + 1])
  end
end
return {1, redis.call('INCR', KEYS[2])}
"#;

/// Per-trigger store backed by a Redis hash and a version counter.
pub struct RedisStore {
    connection: MultiplexedConnection,
    data_key: String,
    version_key: String,
    commit_script: Script,
}

impl RedisStore {
    pub fn new(connection: MultiplexedConnection, prefix: &str, trigger: &TriggerKey) -> Self {
        let base = format!("{}:trigger:{}", prefix, trigger);

        Self {
            connection,
            data_key: format!("{}:data", base),
            version_key: format!("{}:version", base),
            commit_script: Script::new(COMMIT_SCRIPT),
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn read(&self) -> Result<StoreSnapshot, StoreError> {
        let mut conn = self.connection.clone();

        let (version, values): (Option<u64>, HashMap<String, String>) = redis::pipe()
            .atomic()
            .get(&self.version_key)
            .hgetall(&self.data_key)
            .query_async(&mut conn)
            .await?;

        Ok(StoreSnapshot {
            version: version.unwrap_or(0),
            values,
        })
    }

    async fn commit(&self, expected_version: u64, writes: &Overlay) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();

        let mut invocation = self.commit_script.prepare_invoke();
        invocation
            .key(&self.data_key)
            .key(&self.version_key)
            .arg(expected_version);

        for (field, value) in writes {
            match value {
                Some(value) => invocation.arg("set").arg(field).arg(value),
                None => invocation.arg("del").arg(field).arg(""),
            };
        }

        let (committed, version): (i64, u64) = invocation.invoke_async(&mut conn).await?;

        if committed == 0 {
            return Err(StoreError::Conflict {
                expected: expected_version,
                actual: version,
            });
        }

        Ok(version)
    }
}

pub struct RedisStoreProvider {
    connection: MultiplexedConnection,
    key_prefix: String,
}

impl RedisStoreProvider {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to Redis...");

        let client = Client::open(config.redis_url.as_str())
            .map_err(|_| anyhow!("Failed to create redis client"))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|_| anyhow!("Failed to connect to redis client"))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            key_prefix: config.store_key_prefix.clone(),
        })
    }

    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn triggers_key(&self) -> String {
        format!("{}:triggers", self.key_prefix)
    }
}

#[async_trait]
impl StoreProvider for RedisStoreProvider {
    fn open(&self, trigger: &TriggerKey) -> Arc<dyn SharedStore> {
        Arc::new(RedisStore::new(
            self.connection.clone(),
            &self.key_prefix,
            trigger,
        ))
    }

    async fn remember_trigger(&self, trigger: &TriggerKey) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();

        conn.sadd::<_, _, ()>(self.triggers_key(), trigger.to_string())
            .await?;

        Ok(())
    }

    async fn known_triggers(&self) -> Result<Vec<TriggerKey>, StoreError> {
        let mut conn = self.connection.clone();

        let members: Vec<String> = conn.smembers(self.triggers_key()).await?;

        Ok(members
            .into_iter()
            .filter_map(|member| match member.parse::<TriggerKey>() {
                Ok(trigger) => Some(trigger),
                Err(e) => {
                    warn!(member = %member, error = %e, "Skipping unreadable trigger key");
                    None
                }
            })
            .collect())
    }
}
