//! Remote backup retention
//!
//! After a successful upload, old backups under the configured prefix are
//! pruned either by age or all at once. The run's own backup is never
//! selected, and keys that do not carry the backup suffix are never touched.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::artifact::{listing_prefix, ArtifactKey, ARTIFACT_SUFFIX};
use crate::config::BackupJobConfig;
use crate::storage::ObjectStore;
use crate::{BackupError, Result};

/// Which remote backups to delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Every backup except the current one
    DeleteAll,
    /// Backups strictly older than the given age
    MaxAge(Duration),
}

impl RetentionPolicy {
    /// Policy configured for the job, if any.
    ///
    /// `deleteAll` wins over `deleteOlderThan`. A blank age means no pruning,
    /// an unparsable one is an error.
    pub fn from_config(config: &BackupJobConfig) -> Result<Option<Self>> {
        if config.delete_all {
            return Ok(Some(Self::DeleteAll));
        }

        let raw = config
            .delete_older_than
            .as_deref()
            .filter(|raw| !raw.trim().is_empty());
        match raw {
            Some(raw) => parse_max_age(raw).map(|age| Some(Self::MaxAge(age))),
            None => Ok(None),
        }
    }
}

/// Parse a `deleteOlderThan` value: integer milliseconds.
///
/// Integers beyond the representable range saturate, so a huge age never
/// deletes anything and a huge negative one deletes everything.
pub fn parse_max_age(raw: &str) -> Result<Duration> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        error!(value = %raw, "Error parsing deleteOlderThan in config");
        return Err(BackupError::InvalidRetention(raw.to_string()));
    }

    let saturated = if trimmed.starts_with('-') {
        Duration::MIN
    } else {
        Duration::MAX
    };
    Ok(trimmed
        .parse::<i64>()
        .ok()
        .and_then(Duration::try_milliseconds)
        .unwrap_or(saturated))
}

/// A listed key that looks like a backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBackupEntry {
    pub key: String,
    /// `None` when the timestamp in the key does not parse
    pub created_at: Option<DateTime<Utc>>,
}

impl RemoteBackupEntry {
    /// `None` for keys without the backup suffix
    pub fn from_key(key: &str, prefix: &str) -> Option<Self> {
        if !key.contains(ARTIFACT_SUFFIX) {
            return None;
        }

        Some(Self {
            key: key.to_string(),
            created_at: ArtifactKey::parse(key, prefix).map(|k| k.created_at()),
        })
    }
}

/// Keys to delete under `policy`, in listing order
pub fn select_for_deletion(
    entries: &[RemoteBackupEntry],
    policy: &RetentionPolicy,
    current_key: &str,
    now: DateTime<Utc>,
) -> Vec<String> {
    entries
        .iter()
        .filter(|entry| entry.key != current_key)
        .filter(|entry| match policy {
            RetentionPolicy::DeleteAll => true,
            RetentionPolicy::MaxAge(max_age) => entry
                .created_at
                .map(|created_at| now.signed_duration_since(created_at) > *max_age)
                .unwrap_or(false),
        })
        .map(|entry| entry.key.clone())
        .collect()
}

/// Result of a prune pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Keys returned by the listing
    pub listed: usize,
    /// Listed keys carrying the backup suffix
    pub managed: usize,
    /// Keys deleted
    pub deleted: Vec<String>,
}

/// Deletes old backups under one prefix
pub struct RetentionPruner {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl RetentionPruner {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// List, select and delete.
    ///
    /// Deletes run as separate tasks. The first failure is returned right away
    /// and the deletes still in flight are left to finish on their own.
    pub async fn prune(
        &self,
        policy: &RetentionPolicy,
        current: &ArtifactKey,
        now: DateTime<Utc>,
    ) -> Result<PruneReport> {
        let prefix = listing_prefix(&self.prefix);
        let keys = self.store.list_objects(&prefix).await.map_err(|e| {
            error!(bucket = self.store.bucket(), prefix = %prefix, error = %e, "Error listing old backups");
            BackupError::Listing(e)
        })?;

        let entries: Vec<RemoteBackupEntry> = keys
            .iter()
            .filter_map(|key| RemoteBackupEntry::from_key(key, &self.prefix))
            .collect();

        let selected = select_for_deletion(&entries, policy, &current.key(), now);
        debug!(
            listed = keys.len(),
            managed = entries.len(),
            selected = selected.len(),
            ?policy,
            "Selected old backups"
        );

        let mut deletes = JoinSet::new();
        for key in &selected {
            let store = Arc::clone(&self.store);
            let key = key.clone();
            deletes.spawn(async move { delete_backup(store.as_ref(), &key).await });
        }

        while let Some(joined) = deletes.join_next().await {
            let deleted = joined.map_err(BackupError::from).and_then(|deleted| deleted);
            if let Err(e) = deleted {
                deletes.detach_all();
                return Err(e);
            }
        }

        info!("Old backups deleted ({})", selected.len());
        Ok(PruneReport {
            listed: keys.len(),
            managed: entries.len(),
            deleted: selected,
        })
    }

}

async fn delete_backup(store: &dyn ObjectStore, key: &str) -> Result<()> {
    store.delete_object(key).await.map_err(|e| {
        error!(key = %key, error = %e, "Error deleting old backup");
        BackupError::Deletion {
            key: key.to_string(),
            source: e,
        }
    })
}
