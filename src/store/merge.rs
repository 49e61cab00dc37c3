use std::collections::BTreeMap;

use tracing::warn;

use crate::{
    models::notification::{MESSAGES_KEY, NotificationRecord, PendingSet},
    store::{Overlay, StoreSnapshot},
};

/// Parses a stored pending set. Absent or blank text is the empty set, and
/// `null` entries are dropped.
pub fn parse_pending_set(raw: Option<&str>) -> Result<PendingSet, serde_json::Error> {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(PendingSet::new()),
    };

    let entries: BTreeMap<String, Option<NotificationRecord>> = serde_json::from_str(raw)?;

    Ok(entries
        .into_iter()
        .filter_map(|(id, record)| record.map(|record| (id, record)))
        .collect())
}

/// Serializes a pending set for storage. The empty set is stored as an absent key.
pub fn serialize_pending_set(set: &PendingSet) -> Result<Option<String>, serde_json::Error> {
    if set.is_empty() {
        return Ok(None);
    }

    serde_json::to_string(set).map(Some)
}

/// Three-way merge of the pending set.
///
/// Ids present at open but gone locally are removed from `remote`; ids new
/// locally are added with the local record. Every other remote entry is kept
/// as the remote side has it.
pub fn merge_pending_sets(
    baseline: &PendingSet,
    local: &PendingSet,
    mut remote: PendingSet,
) -> PendingSet {
    for id in baseline.keys().filter(|id| !local.contains_key(*id)) {
        remote.remove(id);
    }

    for (id, record) in local.iter().filter(|(id, _)| !baseline.contains_key(*id)) {
        remote.insert(id.clone(), record.clone());
    }

    remote
}

/// Computes what to write for every overlay key after a failed commit.
///
/// `initial_messages` is the pending set captured when the wrapper was
/// opened, or `None` if it could not be parsed at that time.
pub fn resolve_writes(
    overlay: &Overlay,
    remote: &StoreSnapshot,
    initial_messages: Option<&PendingSet>,
) -> Overlay {
    overlay
        .iter()
        .map(|(key, local)| {
            let local = local.as_deref();
            let remote = remote.get(key);

            let resolved = if local == remote {
                local.map(str::to_string)
            } else {
                warn!(key = %key, "Conflicting value in shared store");
                resolve_conflict(key, local, remote, initial_messages)
            };

            (key.clone(), resolved)
        })
        .collect()
}

fn resolve_conflict(
    key: &str,
    local: Option<&str>,
    remote: Option<&str>,
    initial_messages: Option<&PendingSet>,
) -> Option<String> {
    if key != MESSAGES_KEY {
        return local.map(str::to_string);
    }

    let Some(baseline) = initial_messages else {
        warn!(key, "Initial pending set is unreadable, keeping local value");
        return local.map(str::to_string);
    };

    let merged = parse_pending_set(local).and_then(|local_set| {
        let remote_set = parse_pending_set(remote)?;
        serialize_pending_set(&merge_pending_sets(baseline, &local_set, remote_set))
    });

    match merged {
        Ok(merged) => merged,
        Err(e) => {
            warn!(key, error = %e, "Failed to merge pending notifications, keeping local value");
            local.map(str::to_string)
        }
    }
}
