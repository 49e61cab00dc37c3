use std::{collections::HashMap, sync::Arc};

use tracing::{debug, error, warn};

use crate::{
    errors::StoreError,
    models::notification::{MESSAGES_KEY, PendingSet},
    store::{Overlay, SharedStore, StoreSnapshot, merge},
};

/// Retries after the first failed commit; a flush makes at most
/// `MAX_FLUSH_RETRIES + 1` commit attempts.
pub const MAX_FLUSH_RETRIES: u32 = 10;

enum FlushStep {
    Commit { baseline: u64, writes: Overlay },
    Refresh { writes: Overlay },
    Merge { remote: StoreSnapshot },
}

/// Buffers writes locally and reconciles them with concurrent writers on flush.
pub struct ReconcilingStore {
    store: Arc<dyn SharedStore>,
    snapshot: StoreSnapshot,
    overlay: Overlay,
    initial_messages: Option<PendingSet>,
}

impl ReconcilingStore {
    pub async fn open(store: Arc<dyn SharedStore>) -> Result<Self, StoreError> {
        let snapshot = store.read().await?;

        let initial_messages = match merge::parse_pending_set(snapshot.get(MESSAGES_KEY)) {
            Ok(set) => Some(set),
            Err(e) => {
                warn!(error = %e, "Failed to parse initial pending notifications");
                None
            }
        };

        Ok(Self {
            store,
            snapshot,
            overlay: Overlay::new(),
            initial_messages,
        })
    }

    pub fn get_value(&self, key: &str) -> Option<&str> {
        match self.overlay.get(key) {
            Some(pending) => pending.as_deref(),
            None => self.snapshot.get(key),
        }
    }

    pub fn put_value(&mut self, key: impl Into<String>, value: Option<String>) {
        self.overlay.insert(key.into(), value);
    }

    pub fn put_values<I, K>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, Option<String>)>,
        K: Into<String>,
    {
        for (key, value) in values {
            self.put_value(key, value);
        }
    }

    /// Last-read remote values with pending writes applied on top.
    pub fn values(&self) -> HashMap<String, String> {
        let mut values = self.snapshot.values.clone();
        for (key, value) in &self.overlay {
            match value {
                Some(value) => {
                    values.insert(key.clone(), value.clone());
                }
                None => {
                    values.remove(key);
                }
            }
        }
        values
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.overlay.is_empty()
    }

    /// Commits pending writes. Never fails: when the retry budget runs out
    /// an error is logged and the writes stay pending for the next flush.
    pub async fn flush(&mut self) {
        match self.try_flush().await {
            Ok(attempts) => debug!(attempts, "Shared store flushed"),
            Err(e) => {
                error!(
                    error = %e,
                    pending = self.overlay.len(),
                    "Failed to flush shared store, writes stay pending"
                );
                self.refresh_snapshot().await;
            }
        }
    }

    async fn try_flush(&mut self) -> Result<u32, StoreError> {
        if self.overlay.is_empty() {
            self.refresh_snapshot().await;
            return Ok(0);
        }

        let mut attempts = 0;
        let mut baseline = self.snapshot.version;
        let mut step = FlushStep::Commit {
            baseline,
            writes: self.overlay.clone(),
        };

        loop {
            step = match step {
                FlushStep::Commit {
                    baseline: expected,
                    writes,
                } => {
                    attempts += 1;

                    match self.store.commit(expected, &writes).await {
                        Ok(version) => {
                            self.snapshot.apply(&writes, version);
                            self.overlay.clear();
                            return Ok(attempts);
                        }
                        Err(e) => {
                            if attempts > MAX_FLUSH_RETRIES {
                                return Err(StoreError::ConflictExhausted { attempts });
                            }
                            debug!(attempt = attempts, error = %e, "Shared store commit failed");
                            FlushStep::Refresh { writes }
                        }
                    }
                }
                FlushStep::Refresh { writes } => match self.store.read().await {
                    Ok(remote) => FlushStep::Merge { remote },
                    Err(e) => {
                        debug!(error = %e, "Failed to re-read shared store");
                        FlushStep::Commit { baseline, writes }
                    }
                },
                FlushStep::Merge { remote } => {
                    let writes =
                        merge::resolve_writes(&self.overlay, &remote, self.initial_messages.as_ref());
                    baseline = remote.version;
                    self.snapshot = remote;
                    FlushStep::Commit { baseline, writes }
                }
            };
        }
    }

    async fn refresh_snapshot(&mut self) {
        match self.store.read().await {
            Ok(snapshot) => self.snapshot = snapshot,
            Err(e) => debug!(error = %e, "Failed to refresh shared store snapshot"),
        }
    }
}
