//! Versioned key/value storage shared by every node serving a trigger.
//!
//! A [`SharedStore`] exposes a full snapshot plus a monotonically increasing
//! version, and accepts a batch of writes only when the caller still holds the
//! latest version. [`ReconcilingStore`](wrapper::ReconcilingStore) layers
//! local buffering and conflict resolution on top.

pub mod merge;
pub mod wrapper;

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{errors::StoreError, models::trigger::TriggerKey};

pub use wrapper::{MAX_FLUSH_RETRIES, ReconcilingStore};

/// Pending writes. `None` deletes the key.
pub type Overlay = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub version: u64,
    pub values: HashMap<String, String>,
}

impl StoreSnapshot {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Folds a committed overlay into this snapshot.
    pub fn apply(&mut self, writes: &Overlay, version: u64) {
        for (key, value) in writes {
            match value {
                Some(value) => {
                    self.values.insert(key.clone(), value.clone());
                }
                None => {
                    self.values.remove(key);
                }
            }
        }
        self.version = version;
    }
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn read(&self) -> Result<StoreSnapshot, StoreError>;

    /// Applies `writes` atomically if the store is still at `expected_version`
    /// and returns the new version. A stale version is [`StoreError::Conflict`].
    async fn commit(&self, expected_version: u64, writes: &Overlay) -> Result<u64, StoreError>;
}

/// Hands out the shared store of each trigger and tracks which triggers
/// have ever been subscribed.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    fn open(&self, trigger: &TriggerKey) -> Arc<dyn SharedStore>;

    async fn remember_trigger(&self, trigger: &TriggerKey) -> Result<(), StoreError>;

    async fn known_triggers(&self) -> Result<Vec<TriggerKey>, StoreError>;
}

/// Process-local store, used in tests and single-node setups.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Self {
            inner: Mutex::new(StoreSnapshot { version: 0, values }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreSnapshot>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn read(&self) -> Result<StoreSnapshot, StoreError> {
        Ok(self.lock()?.clone())
    }

    async fn commit(&self, expected_version: u64, writes: &Overlay) -> Result<u64, StoreError> {
        let mut snapshot = self.lock()?;

        if snapshot.version != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                actual: snapshot.version,
            });
        }

        let version = snapshot.version + 1;
        snapshot.apply(writes, version);

        Ok(version)
    }
}

#[derive(Default)]
pub struct MemoryStoreProvider {
    stores: Mutex<HashMap<TriggerKey, Arc<MemoryStore>>>,
    triggers: Mutex<HashSet<TriggerKey>>,
}

impl MemoryStoreProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreProvider for MemoryStoreProvider {
    fn open(&self, trigger: &TriggerKey) -> Arc<dyn SharedStore> {
        let mut stores = match self.stores.lock() {
            Ok(stores) => stores,
            Err(poisoned) => poisoned.into_inner(),
        };

        stores.entry(trigger.clone()).or_default().clone()
    }

    async fn remember_trigger(&self, trigger: &TriggerKey) -> Result<(), StoreError> {
        self.triggers
            .lock()
            .map_err(|_| StoreError::Unavailable("trigger registry lock poisoned".to_string()))?
            .insert(trigger.clone());
        Ok(())
    }

    async fn known_triggers(&self) -> Result<Vec<TriggerKey>, StoreError> {
        let triggers = self
            .triggers
            .lock()
            .map_err(|_| StoreError::Unavailable("trigger registry lock poisoned".to_string()))?;

        Ok(triggers.iter().cloned().collect())
    }
}
